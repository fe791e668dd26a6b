use crate::activity::ActivityLog;
use crate::api::{AuthApi, CoursesApi, ExportApi, GradesApi, StatisticsApi, StudentsApi};
use crate::commands::{
    parse_line, Command, CoursesCommand, GradesCommand, ShellInput, StudentsCommand,
};
use crate::config::Config;
use crate::display;
use crate::error::{ApiError, Operation};
use crate::export::{self, ExportKind};
use crate::models::RegisterRequest;
use crate::session::{SessionEvent, SessionStatus, SessionStore};
use crate::transport::Transport;
use anyhow::{anyhow, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use tracing::warn;

/// The view the shell is currently on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Where an expired or missing session sends the user
    Login,
    Dashboard,
    Students,
    Courses,
    Grades,
    Statistics,
    Export,
}

impl Location {
    pub fn as_str(&self) -> &'static str {
        match self {
            Location::Login => "login",
            Location::Dashboard => "dashboard",
            Location::Students => "students",
            Location::Courses => "courses",
            Location::Grades => "grades",
            Location::Statistics => "stats",
            Location::Export => "export",
        }
    }

    fn for_command(cmd: &Command) -> Option<Self> {
        match cmd {
            Command::Login { .. } | Command::Register { .. } => Some(Location::Login),
            Command::Dashboard => Some(Location::Dashboard),
            Command::Students(_) => Some(Location::Students),
            Command::Courses(_) => Some(Location::Courses),
            Command::Grades(_) => Some(Location::Grades),
            Command::Stats { .. } => Some(Location::Statistics),
            Command::Export { .. } => Some(Location::Export),
            Command::Logout | Command::Whoami => None,
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures the shell reports on its own terms
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("Please log in first.")]
    LoginRequired,
    #[error("Session is still loading, try again in a moment.")]
    Loading,
    #[error("This command requires an administrator account.")]
    AdminRequired,
    /// Already announced by the session event handler
    #[error("Session expired. Please log in again.")]
    Expired,
    #[error("{0}")]
    Api(String),
}

impl ShellError {
    fn from_api(err: ApiError, op: Operation) -> Self {
        if err.is_unauthorized() && op != Operation::Login {
            ShellError::Expired
        } else {
            ShellError::Api(err.user_message(op))
        }
    }
}

fn api(err: ApiError) -> anyhow::Error {
    ShellError::from_api(err, Operation::Other).into()
}

pub struct Context {
    pub config: Config,
    pub transport: Rc<Transport>,
    pub session: SessionStore,
    pub location: Rc<RefCell<Location>>,
    pub activity: Option<Rc<RefCell<ActivityLog>>>,
}

impl Context {
    pub fn new(
        config: Config,
        transport: Rc<Transport>,
        session: SessionStore,
        activity: Option<ActivityLog>,
    ) -> Self {
        let location = Rc::new(RefCell::new(Location::Login));
        let activity = activity.map(|log| Rc::new(RefCell::new(log)));

        let loc = location.clone();
        let log = activity.clone();
        session.subscribe(move |event| on_session_event(event, &loc, log.as_deref()));

        Self {
            config,
            transport,
            session,
            location,
            activity,
        }
    }

    pub fn location(&self) -> Location {
        *self.location.borrow()
    }

    fn navigate(&self, to: Location) {
        *self.location.borrow_mut() = to;
    }

    /// Protected commands need a determined, present session
    fn require_session(&self) -> Result<(), ShellError> {
        let status = self.session.status();
        if !status.is_ready() {
            return Err(ShellError::Loading);
        }
        if status == SessionStatus::Unauthenticated {
            self.navigate(Location::Login);
            return Err(ShellError::LoginRequired);
        }
        Ok(())
    }

    fn log_export(&self, kind: &ExportKind, path: &std::path::Path, bytes: usize) {
        if let Some(log) = &self.activity {
            if let Err(e) = log.borrow_mut().export(&kind.to_string(), path, bytes) {
                warn!(error = %e, "could not write activity log");
            }
        }
    }
}

fn on_session_event(
    event: &SessionEvent,
    location: &RefCell<Location>,
    activity: Option<&RefCell<ActivityLog>>,
) {
    let logged = match event {
        SessionEvent::Expired { path } => {
            if *location.borrow() != Location::Login {
                *location.borrow_mut() = Location::Login;
            }
            eprintln!("{}", ShellError::Expired);
            activity.map(|log| log.borrow_mut().session_expired(path))
        }
        SessionEvent::LoggedIn(user) => {
            activity.map(|log| log.borrow_mut().login(&user.username, &user.role))
        }
        SessionEvent::LoginFailed { message } => {
            activity.map(|log| log.borrow_mut().login_failed(message))
        }
        SessionEvent::LoggedOut => activity.map(|log| log.borrow_mut().logout()),
        SessionEvent::Ready { .. } => None,
    };
    if let Some(Err(e)) = logged {
        warn!(error = %e, "could not write activity log");
    }
}

/// Print a command failure unless it was already announced
pub fn report(err: &anyhow::Error) {
    if let Some(line) = report_line(err) {
        eprintln!("{}", line);
    }
}

fn report_line(err: &anyhow::Error) -> Option<String> {
    if matches!(err.downcast_ref::<ShellError>(), Some(ShellError::Expired)) {
        return None;
    }
    Some(format!("Error: {}", err))
}

fn prompt_password() -> Result<String> {
    let password = rpassword::prompt_password("Password: ")
        .map_err(|e| anyhow!("Failed to read password: {}", e))?;
    if password.is_empty() {
        return Err(anyhow!("Password must not be empty"));
    }
    Ok(password)
}

fn resolve_password(given: &Option<String>) -> Result<String> {
    match given {
        Some(p) => Ok(p.clone()),
        None => prompt_password(),
    }
}

pub fn dispatch(ctx: &Context, cmd: &Command) -> Result<()> {
    if cmd.requires_session() {
        ctx.require_session()?;
        if cmd.requires_admin() && !ctx.session.is_admin() {
            return Err(ShellError::AdminRequired.into());
        }
    }
    if let Some(to) = Location::for_command(cmd) {
        ctx.navigate(to);
    }

    match cmd {
        Command::Login { username, password } => {
            let password = resolve_password(password)?;
            let session = ctx
                .session
                .login(username, &password)
                .map_err(|e| ShellError::from_api(e, Operation::Login))?;
            ctx.navigate(Location::Dashboard);
            println!(
                "Logged in as {} ({}){}",
                session.user.full_name,
                session.user.username,
                if session.is_admin() { " [admin]" } else { "" }
            );
        }
        Command::Logout => {
            ctx.session.logout()?;
            ctx.navigate(Location::Login);
            println!("Logged out.");
        }
        Command::Whoami => match ctx.session.session() {
            Some(s) => println!(
                "{} ({}) role {}",
                s.user.full_name,
                s.user.username,
                s.user.role
            ),
            None => println!("Not logged in."),
        },
        Command::Register {
            username,
            full_name,
            password,
        } => {
            let request = RegisterRequest {
                username: username.clone(),
                password: resolve_password(password)?,
                full_name: full_name.clone(),
            };
            let message = AuthApi::new(&ctx.transport)
                .register(&request)
                .map_err(|e| ShellError::from_api(e, Operation::Login))?;
            println!(
                "{}",
                if message.is_empty() {
                    "Registered."
                } else {
                    message.as_str()
                }
            );
        }
        Command::Dashboard | Command::Stats { student: None } => {
            let stats = StatisticsApi::new(&ctx.transport).overall().map_err(api)?;
            print!("{}", display::dashboard(&stats));
        }
        Command::Stats {
            student: Some(id),
        } => {
            let stats = StatisticsApi::new(&ctx.transport).student(id).map_err(api)?;
            for (key, value) in &stats {
                match value {
                    serde_json::Value::String(s) => println!("{}: {}", key, s),
                    other => println!("{}: {}", key, other),
                }
            }
        }
        Command::Students(sub) => students(ctx, sub)?,
        Command::Courses(sub) => courses(ctx, sub)?,
        Command::Grades(sub) => grades(ctx, sub)?,
        Command::Export {
            scope,
            format,
            student,
            out,
        } => {
            let kind = ExportKind::parse(scope, format, student.as_deref())
                .ok_or_else(|| anyhow!("Exporting a single student needs --student <id>"))?;
            let bytes = ExportApi::new(&ctx.transport).fetch(&kind).map_err(api)?;
            let dir: PathBuf = out.clone().unwrap_or_else(|| ctx.config.export_dir());
            let path = export::save(&dir, &kind, &bytes)?;
            ctx.log_export(&kind, &path, bytes.len());
            println!("Saved {} to {}", kind, path.display());
        }
    }
    Ok(())
}

fn students(ctx: &Context, cmd: &StudentsCommand) -> Result<()> {
    let api_client = StudentsApi::new(&ctx.transport);
    match cmd {
        StudentsCommand::List { .. } => {
            let request = cmd.page_request().unwrap_or_default();
            let page = api_client.list(&request).map_err(api)?;
            print!("{}", display::students_table(&page.content));
            println!("{}", display::page_footer(&page));
        }
        StudentsCommand::All => {
            let all = api_client.all().map_err(api)?;
            print!("{}", display::students_table(&all));
        }
        StudentsCommand::Get { id } => {
            let student = api_client.get(id).map_err(api)?;
            print!("{}", display::student_detail(&student));
        }
        StudentsCommand::Search { query, page } => {
            let found = api_client.search(query, page.page, page.size).map_err(api)?;
            print!("{}", display::students_table(&found.content));
            println!("{}", display::page_footer(&found));
        }
        StudentsCommand::Create { .. } => {
            let input = cmd.input().unwrap_or_default();
            let student = api_client.create(&input).map_err(api)?;
            println!("Created student {} ({})", student.full_name(), student.id);
        }
        StudentsCommand::Update { id, .. } => {
            let input = cmd.input().unwrap_or_default();
            let student = api_client.update(id, &input).map_err(api)?;
            println!("Updated student {} ({})", student.full_name(), student.id);
        }
        StudentsCommand::Delete { id } => {
            api_client.delete(id).map_err(api)?;
            println!("Deleted student {}", id);
        }
        StudentsCommand::Deactivate { id } => {
            api_client.deactivate(id).map_err(api)?;
            println!("Deactivated student {}", id);
        }
    }
    Ok(())
}

fn courses(ctx: &Context, cmd: &CoursesCommand) -> Result<()> {
    let api_client = CoursesApi::new(&ctx.transport);
    match cmd {
        CoursesCommand::List => {
            let all = api_client.list().map_err(api)?;
            print!("{}", display::courses_table(&all));
        }
        CoursesCommand::Get { id } => {
            let course = api_client.get(id).map_err(api)?;
            print!("{}", display::courses_table(std::slice::from_ref(&course)));
        }
        CoursesCommand::Code { code } => {
            let course = api_client.by_code(code).map_err(api)?;
            print!("{}", display::courses_table(std::slice::from_ref(&course)));
        }
        CoursesCommand::Create { .. } => {
            let input = cmd.input().unwrap_or_default();
            let course = api_client.create(&input).map_err(api)?;
            println!("Created course {} ({})", course.code, course.id);
        }
        CoursesCommand::Update { id, .. } => {
            let input = cmd.input().unwrap_or_default();
            let course = api_client.update(id, &input).map_err(api)?;
            println!("Updated course {} ({})", course.code, course.id);
        }
        CoursesCommand::Delete { id } => {
            api_client.delete(id).map_err(api)?;
            println!("Deleted course {}", id);
        }
    }
    Ok(())
}

fn grades(ctx: &Context, cmd: &GradesCommand) -> Result<()> {
    let api_client = GradesApi::new(&ctx.transport);
    match cmd {
        GradesCommand::List => {
            let all = api_client.list().map_err(api)?;
            print!("{}", display::grades_table(&all));
        }
        GradesCommand::Get { id } => {
            let grade = api_client.get(id).map_err(api)?;
            print!("{}", display::grades_table(std::slice::from_ref(&grade)));
        }
        GradesCommand::Student { id, page, size } => {
            if page.is_some() || size.is_some() {
                let found = api_client
                    .by_student_paged(id, page.unwrap_or(0), size.unwrap_or(10))
                    .map_err(api)?;
                print!("{}", display::grades_table(&found.content));
                println!("{}", display::page_footer(&found));
            } else {
                let all = api_client.by_student(id).map_err(api)?;
                print!("{}", display::grades_table(&all));
            }
        }
        GradesCommand::Course { id } => {
            let all = api_client.by_course(id).map_err(api)?;
            print!("{}", display::grades_table(&all));
        }
        GradesCommand::Create { .. } => {
            let input = cmd.input().unwrap_or_default();
            let grade = api_client.create(&input).map_err(api)?;
            println!("Created grade {} ({:.2})", grade.id, grade.numeric_score);
        }
        GradesCommand::Update { id, .. } => {
            let input = cmd.input().unwrap_or_default();
            let grade = api_client.update(id, &input).map_err(api)?;
            println!("Updated grade {} ({:.2})", grade.id, grade.numeric_score);
        }
        GradesCommand::Delete { id } => {
            api_client.delete(id).map_err(api)?;
            println!("Deleted grade {}", id);
        }
    }
    Ok(())
}

pub fn run_once(ctx: &Context, cmd: &Command) -> Result<()> {
    dispatch(ctx, cmd)
}

pub fn run_repl(ctx: Context) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    let history = dirs::home_dir().map(|h| h.join(".gradebook").join("history"));
    if let Some(path) = &history {
        let _ = rl.load_history(path);
    }

    println!("gradebook - type help for commands, exit to quit");
    if let Some(s) = ctx.session.session() {
        ctx.navigate(Location::Dashboard);
        println!("Signed in as {} ({})", s.user.full_name, s.user.username);
    } else {
        println!("Not logged in. Use: login <username>");
    }

    loop {
        let prompt = format!("gradebook:{}> ", ctx.location());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                // Keep passwords out of the history file
                if !line.contains("--password") {
                    rl.add_history_entry(line)?;
                }

                match parse_line(line) {
                    Ok(ShellInput::Exit) => break,
                    Ok(ShellInput::Empty) => {}
                    Ok(ShellInput::Message(e)) => {
                        let _ = e.print();
                    }
                    Ok(ShellInput::Run(cmd)) => {
                        if let Err(e) = dispatch(&ctx, &cmd) {
                            report(&e);
                        }
                    }
                    Err(e) => eprintln!("{}", e),
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    if let Some(path) = &history {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = rl.save_history(path);
    }
    Ok(())
}
