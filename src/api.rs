//! Typed clients for each resource family of the grade service.
//!
//! These are thin: they build an [`ApiRequest`] and hand it to the shared
//! [`Transport`]. Payloads pass through unmodified.

use crate::error::ApiResult;
use crate::export::ExportKind;
use crate::models::{
    AuthResponse, Course, CourseInput, Grade, GradeInput, LoginRequest, Page, PageRequest,
    RegisterRequest, Statistics, Student, StudentInput, StudentStatistics,
};
use crate::transport::{ApiRequest, Transport};

pub struct AuthApi<'a> {
    transport: &'a Transport,
}

impl<'a> AuthApi<'a> {
    pub fn new(transport: &'a Transport) -> Self {
        Self { transport }
    }

    pub fn login(&self, credentials: &LoginRequest) -> ApiResult<AuthResponse> {
        let req = ApiRequest::post("/auth/login").anonymous().json(credentials)?;
        self.transport.json(req)
    }

    /// Returns the server's confirmation message
    pub fn register(&self, request: &RegisterRequest) -> ApiResult<String> {
        let req = ApiRequest::post("/auth/register").anonymous().json(request)?;
        self.transport.text(req)
    }
}

fn paged(req: ApiRequest, page: &PageRequest) -> ApiRequest {
    req.query_opt("page", page.page)
        .query_opt("size", page.size)
        .query_opt("sortBy", page.sort_by.as_deref())
        .query_opt("sortDir", page.sort_dir)
}

pub struct StudentsApi<'a> {
    transport: &'a Transport,
}

impl<'a> StudentsApi<'a> {
    pub fn new(transport: &'a Transport) -> Self {
        Self { transport }
    }

    pub fn list(&self, page: &PageRequest) -> ApiResult<Page<Student>> {
        self.transport.json(paged(ApiRequest::get("/students"), page))
    }

    pub fn all(&self) -> ApiResult<Vec<Student>> {
        self.transport.json(ApiRequest::get("/students/all"))
    }

    pub fn get(&self, id: &str) -> ApiResult<Student> {
        self.transport.json(ApiRequest::get(format!("/students/{}", id)))
    }

    pub fn search(&self, query: &str, page: u32, size: u32) -> ApiResult<Page<Student>> {
        let req = ApiRequest::get("/students/search")
            .query("query", query)
            .query("page", page)
            .query("size", size);
        self.transport.json(req)
    }

    pub fn create(&self, student: &StudentInput) -> ApiResult<Student> {
        self.transport
            .json(ApiRequest::post("/students").json(student)?)
    }

    pub fn update(&self, id: &str, student: &StudentInput) -> ApiResult<Student> {
        self.transport
            .json(ApiRequest::put(format!("/students/{}", id)).json(student)?)
    }

    pub fn delete(&self, id: &str) -> ApiResult<()> {
        self.transport
            .send(ApiRequest::delete(format!("/students/{}", id)))
    }

    pub fn deactivate(&self, id: &str) -> ApiResult<()> {
        self.transport
            .send(ApiRequest::patch(format!("/students/{}/deactivate", id)))
    }
}

pub struct CoursesApi<'a> {
    transport: &'a Transport,
}

impl<'a> CoursesApi<'a> {
    pub fn new(transport: &'a Transport) -> Self {
        Self { transport }
    }

    pub fn list(&self) -> ApiResult<Vec<Course>> {
        self.transport.json(ApiRequest::get("/courses"))
    }

    pub fn get(&self, id: &str) -> ApiResult<Course> {
        self.transport.json(ApiRequest::get(format!("/courses/{}", id)))
    }

    pub fn by_code(&self, code: &str) -> ApiResult<Course> {
        self.transport
            .json(ApiRequest::get(format!("/courses/code/{}", code)))
    }

    pub fn create(&self, course: &CourseInput) -> ApiResult<Course> {
        self.transport.json(ApiRequest::post("/courses").json(course)?)
    }

    pub fn update(&self, id: &str, course: &CourseInput) -> ApiResult<Course> {
        self.transport
            .json(ApiRequest::put(format!("/courses/{}", id)).json(course)?)
    }

    pub fn delete(&self, id: &str) -> ApiResult<()> {
        self.transport
            .send(ApiRequest::delete(format!("/courses/{}", id)))
    }
}

pub struct GradesApi<'a> {
    transport: &'a Transport,
}

impl<'a> GradesApi<'a> {
    pub fn new(transport: &'a Transport) -> Self {
        Self { transport }
    }

    pub fn list(&self) -> ApiResult<Vec<Grade>> {
        self.transport.json(ApiRequest::get("/grades"))
    }

    pub fn get(&self, id: &str) -> ApiResult<Grade> {
        self.transport.json(ApiRequest::get(format!("/grades/{}", id)))
    }

    pub fn by_student(&self, student_id: &str) -> ApiResult<Vec<Grade>> {
        self.transport
            .json(ApiRequest::get(format!("/grades/student/{}", student_id)))
    }

    pub fn by_student_paged(&self, student_id: &str, page: u32, size: u32) -> ApiResult<Page<Grade>> {
        let req = ApiRequest::get(format!("/grades/student/{}/paginated", student_id))
            .query("page", page)
            .query("size", size);
        self.transport.json(req)
    }

    pub fn by_course(&self, course_id: &str) -> ApiResult<Vec<Grade>> {
        self.transport
            .json(ApiRequest::get(format!("/grades/course/{}", course_id)))
    }

    pub fn create(&self, grade: &GradeInput) -> ApiResult<Grade> {
        self.transport.json(ApiRequest::post("/grades").json(grade)?)
    }

    pub fn update(&self, id: &str, grade: &GradeInput) -> ApiResult<Grade> {
        self.transport
            .json(ApiRequest::put(format!("/grades/{}", id)).json(grade)?)
    }

    pub fn delete(&self, id: &str) -> ApiResult<()> {
        self.transport
            .send(ApiRequest::delete(format!("/grades/{}", id)))
    }
}

pub struct StatisticsApi<'a> {
    transport: &'a Transport,
}

impl<'a> StatisticsApi<'a> {
    pub fn new(transport: &'a Transport) -> Self {
        Self { transport }
    }

    pub fn overall(&self) -> ApiResult<Statistics> {
        self.transport.json(ApiRequest::get("/statistics"))
    }

    pub fn student(&self, student_id: &str) -> ApiResult<StudentStatistics> {
        self.transport
            .json(ApiRequest::get(format!("/statistics/student/{}", student_id)))
    }
}

pub struct ExportApi<'a> {
    transport: &'a Transport,
}

impl<'a> ExportApi<'a> {
    pub fn new(transport: &'a Transport) -> Self {
        Self { transport }
    }

    pub fn fetch(&self, kind: &ExportKind) -> ApiResult<Vec<u8>> {
        let req = ApiRequest::get(kind.path()).accept(kind.mime_type());
        self.transport.bytes(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::Format;
    use crate::http::stub::StubBackend;
    use crate::http::Method;
    use crate::models::SortDir;
    use crate::storage::MemoryStore;
    use serde_json::json;
    use std::rc::Rc;
    use std::time::Duration;

    fn setup() -> (Rc<StubBackend>, Transport) {
        let backend = Rc::new(StubBackend::new());
        let transport = Transport::new(
            "http://api.test/api",
            Duration::from_secs(5),
            Box::new(backend.clone()),
            Rc::new(MemoryStore::new()),
        );
        (backend, transport)
    }

    fn page_json() -> serde_json::Value {
        json!({"content": [], "totalElements": 0, "totalPages": 0, "size": 10, "number": 0})
    }

    #[test]
    fn test_students_list_pagination_params() {
        let (backend, transport) = setup();
        backend.push_json(200, page_json());
        let page = PageRequest {
            page: Some(1),
            size: Some(20),
            sort_by: Some("lastName".to_string()),
            sort_dir: Some(SortDir::Desc),
        };
        StudentsApi::new(&transport).list(&page).unwrap();

        let req = backend.last_request();
        assert_eq!(req.url, "http://api.test/api/students");
        assert_eq!(
            req.query,
            vec![
                ("page".to_string(), "1".to_string()),
                ("size".to_string(), "20".to_string()),
                ("sortBy".to_string(), "lastName".to_string()),
                ("sortDir".to_string(), "desc".to_string()),
            ]
        );
    }

    #[test]
    fn test_student_routes() {
        let (backend, transport) = setup();
        let api = StudentsApi::new(&transport);

        backend.push_json(200, page_json());
        api.search("ada", 0, 10).unwrap();
        let req = backend.last_request();
        assert_eq!(req.url, "http://api.test/api/students/search");
        assert_eq!(req.query[0], ("query".to_string(), "ada".to_string()));

        backend.push_json(204, json!(null));
        api.deactivate("s1").unwrap();
        let req = backend.last_request();
        assert_eq!(req.method, Method::Patch);
        assert_eq!(req.url, "http://api.test/api/students/s1/deactivate");

        backend.push_json(200, json!({}));
        api.delete("s1").unwrap();
        assert_eq!(backend.last_request().method, Method::Delete);
    }

    #[test]
    fn test_login_is_anonymous_post() {
        let (backend, transport) = setup();
        backend.push_json(
            200,
            json!({"token": "t1", "type": "Bearer", "username": "u", "fullName": "F", "role": "ROLE_USER", "expiresIn": 60}),
        );
        let resp = AuthApi::new(&transport)
            .login(&LoginRequest {
                username: "u".to_string(),
                password: "p".to_string(),
            })
            .unwrap();
        assert_eq!(resp.token, "t1");
        let req = backend.last_request();
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.url, "http://api.test/api/auth/login");
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(req.body.as_ref().unwrap()).unwrap(),
            json!({"username": "u", "password": "p"})
        );
    }

    #[test]
    fn test_register_returns_message() {
        let (backend, transport) = setup();
        backend.push_bytes(200, "text/plain", b"User registered successfully");
        let msg = AuthApi::new(&transport)
            .register(&RegisterRequest {
                username: "new".to_string(),
                password: "secret".to_string(),
                full_name: "New User".to_string(),
            })
            .unwrap();
        assert_eq!(msg, "User registered successfully");
        let body: serde_json::Value =
            serde_json::from_slice(backend.last_request().body.as_ref().unwrap()).unwrap();
        assert_eq!(body["fullName"], "New User");
    }

    #[test]
    fn test_grade_routes() {
        let (backend, transport) = setup();
        let api = GradesApi::new(&transport);

        backend.push_json(200, json!([]));
        api.by_course("c1").unwrap();
        assert_eq!(backend.last_request().url, "http://api.test/api/grades/course/c1");

        backend.push_json(200, page_json());
        api.by_student_paged("s1", 2, 5).unwrap();
        let req = backend.last_request();
        assert_eq!(req.url, "http://api.test/api/grades/student/s1/paginated");
        assert_eq!(req.query.len(), 2);
    }

    #[test]
    fn test_course_by_code() {
        let (backend, transport) = setup();
        backend.push_json(200, json!({"id": "c1", "name": "Algebra", "code": "MAT101", "credits": 4, "active": true}));
        let course = CoursesApi::new(&transport).by_code("MAT101").unwrap();
        assert_eq!(course.credits, 4);
        assert_eq!(backend.last_request().url, "http://api.test/api/courses/code/MAT101");
    }

    #[test]
    fn test_export_fetches_bytes() {
        let (backend, transport) = setup();
        backend.push_bytes(200, "application/pdf", b"%PDF-1.4");
        let bytes = ExportApi::new(&transport)
            .fetch(&ExportKind::Student {
                id: "s1".to_string(),
                format: Format::Pdf,
            })
            .unwrap();
        assert_eq!(bytes, b"%PDF-1.4");
        let req = backend.last_request();
        assert_eq!(req.url, "http://api.test/api/export/student/s1/pdf");
        assert_eq!(req.header("Accept"), Some("application/pdf"));
    }

    #[test]
    fn test_student_statistics_is_raw_map() {
        let (backend, transport) = setup();
        backend.push_json(200, json!({"average": 91.2, "courses": 3}));
        let stats = StatisticsApi::new(&transport).student("s1").unwrap();
        assert_eq!(stats["courses"], json!(3));
    }
}
