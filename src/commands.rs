//! Command surface shared by one-shot invocations and the interactive shell.
//!
//! The same `Command` tree is parsed from process arguments and from each
//! shell line (split with `shell-words`), so both modes accept identical
//! syntax.

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::models::{CourseInput, GradeInput, PageRequest, SortDir, StudentInput};

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Sign in and persist the session
    Login {
        username: String,
        #[arg(long, env = "GRADEBOOK_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Forget the persisted session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Create an account
    Register {
        username: String,
        #[arg(long)]
        full_name: String,
        #[arg(long, env = "GRADEBOOK_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Overall statistics
    Dashboard,
    #[command(subcommand)]
    Students(StudentsCommand),
    #[command(subcommand)]
    Courses(CoursesCommand),
    #[command(subcommand)]
    Grades(GradesCommand),
    /// Overall statistics, or one student's with --student
    Stats {
        #[arg(long)]
        student: Option<String>,
    },
    /// Download a CSV or PDF report
    Export {
        #[arg(value_parser = ["students", "grades", "student"])]
        scope: String,
        #[arg(value_parser = ["csv", "pdf"])]
        format: String,
        /// Student id, required for the `student` scope
        #[arg(long)]
        student: Option<String>,
        /// Directory to save into (defaults to the configured export dir)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct PageArgs {
    #[arg(long, default_value_t = 0)]
    pub page: u32,
    #[arg(long, default_value_t = 10)]
    pub size: u32,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum StudentsCommand {
    /// Paginated listing
    List {
        #[command(flatten)]
        page: PageArgs,
        #[arg(long)]
        sort_by: Option<String>,
        #[arg(long, value_parser = ["asc", "desc"])]
        sort_dir: Option<String>,
    },
    /// Every student, unpaginated
    All,
    Get {
        id: String,
    },
    Search {
        query: String,
        #[command(flatten)]
        page: PageArgs,
    },
    Create {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        email: String,
        #[command(flatten)]
        extra: StudentExtra,
    },
    Update {
        id: String,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[command(flatten)]
        extra: StudentExtra,
    },
    Delete {
        id: String,
    },
    Deactivate {
        id: String,
    },
}

#[derive(Args, Debug, Clone, PartialEq, Default)]
pub struct StudentExtra {
    #[arg(long)]
    pub phone: Option<String>,
    #[arg(long)]
    pub address: Option<String>,
    #[arg(long)]
    pub enrollment_id: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CoursesCommand {
    List,
    Get {
        id: String,
    },
    /// Look a course up by its code
    Code {
        code: String,
    },
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        code: String,
        #[arg(long)]
        credits: u32,
        #[arg(long)]
        description: Option<String>,
    },
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        code: Option<String>,
        #[arg(long)]
        credits: Option<u32>,
        #[arg(long)]
        description: Option<String>,
    },
    Delete {
        id: String,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum GradesCommand {
    List,
    Get {
        id: String,
    },
    /// Grades for one student; paginated when --page or --size is given
    Student {
        id: String,
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        size: Option<u32>,
    },
    Course {
        id: String,
    },
    Create {
        #[arg(long)]
        student: String,
        #[arg(long)]
        course: String,
        #[arg(long)]
        score: f64,
        /// YYYY-MM-DD
        #[arg(long)]
        date: String,
        #[command(flatten)]
        extra: GradeExtra,
    },
    Update {
        id: String,
        #[arg(long)]
        student: Option<String>,
        #[arg(long)]
        course: Option<String>,
        #[arg(long)]
        score: Option<f64>,
        #[arg(long)]
        date: Option<String>,
        #[command(flatten)]
        extra: GradeExtra,
    },
    Delete {
        id: String,
    },
}

#[derive(Args, Debug, Clone, PartialEq, Default)]
pub struct GradeExtra {
    #[arg(long)]
    pub assessment: Option<String>,
    #[arg(long)]
    pub weight: Option<f64>,
    #[arg(long)]
    pub description: Option<String>,
}

/// One line typed into the interactive shell
#[derive(Parser, Debug)]
#[command(name = "gradebook", no_binary_name = true, disable_version_flag = true)]
pub struct ShellLine {
    #[command(subcommand)]
    pub command: Command,
}

/// What a shell line asks for
#[derive(Debug)]
pub enum ShellInput {
    Exit,
    Empty,
    Run(Command),
    /// Help text or a parse error, already formatted by clap
    Message(clap::Error),
}

/// Split a line like a shell would, then parse it with clap
pub fn parse_line(line: &str) -> Result<ShellInput> {
    let words = shell_words::split(line).map_err(|e| anyhow!("Invalid input: {}", e))?;
    match words.first().map(String::as_str) {
        None => return Ok(ShellInput::Empty),
        Some("exit") | Some("quit") => return Ok(ShellInput::Exit),
        _ => {}
    }
    match ShellLine::try_parse_from(words) {
        Ok(parsed) => Ok(ShellInput::Run(parsed.command)),
        Err(e) => Ok(ShellInput::Message(e)),
    }
}

impl Command {
    /// Whether the command talks to protected endpoints
    pub fn requires_session(&self) -> bool {
        !matches!(
            self,
            Command::Login { .. } | Command::Logout | Command::Whoami | Command::Register { .. }
        )
    }

    /// Student and course mutations are reserved for administrators
    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            Command::Students(
                StudentsCommand::Create { .. }
                    | StudentsCommand::Update { .. }
                    | StudentsCommand::Delete { .. }
                    | StudentsCommand::Deactivate { .. }
            ) | Command::Courses(
                CoursesCommand::Create { .. }
                    | CoursesCommand::Update { .. }
                    | CoursesCommand::Delete { .. }
            )
        )
    }
}

impl StudentsCommand {
    /// Only meaningful for `list`
    pub fn page_request(&self) -> Option<PageRequest> {
        match self {
            StudentsCommand::List {
                page,
                sort_by,
                sort_dir,
            } => Some(PageRequest {
                page: Some(page.page),
                size: Some(page.size),
                sort_by: sort_by.clone(),
                sort_dir: sort_dir.as_deref().and_then(SortDir::parse),
            }),
            _ => None,
        }
    }

    pub fn input(&self) -> Option<StudentInput> {
        match self {
            StudentsCommand::Create {
                first_name,
                last_name,
                email,
                extra,
            } => Some(StudentInput {
                first_name: Some(first_name.clone()),
                last_name: Some(last_name.clone()),
                email: Some(email.clone()),
                phone_number: extra.phone.clone(),
                address: extra.address.clone(),
                enrollment_id: extra.enrollment_id.clone(),
                active: Some(true),
            }),
            StudentsCommand::Update {
                first_name,
                last_name,
                email,
                extra,
                ..
            } => Some(StudentInput {
                first_name: first_name.clone(),
                last_name: last_name.clone(),
                email: email.clone(),
                phone_number: extra.phone.clone(),
                address: extra.address.clone(),
                enrollment_id: extra.enrollment_id.clone(),
                active: None,
            }),
            _ => None,
        }
    }
}

impl CoursesCommand {
    pub fn input(&self) -> Option<CourseInput> {
        match self {
            CoursesCommand::Create {
                name,
                code,
                credits,
                description,
            } => Some(CourseInput {
                name: Some(name.clone()),
                code: Some(code.clone()),
                credits: Some(*credits),
                description: description.clone(),
                active: Some(true),
            }),
            CoursesCommand::Update {
                name,
                code,
                credits,
                description,
                ..
            } => Some(CourseInput {
                name: name.clone(),
                code: code.clone(),
                credits: *credits,
                description: description.clone(),
                active: None,
            }),
            _ => None,
        }
    }
}

impl GradesCommand {
    pub fn input(&self) -> Option<GradeInput> {
        match self {
            GradesCommand::Create {
                student,
                course,
                score,
                date,
                extra,
            } => Some(GradeInput {
                student_id: Some(student.clone()),
                course_id: Some(course.clone()),
                numeric_score: Some(*score),
                grade_date: Some(date.clone()),
                description: extra.description.clone(),
                assessment: extra.assessment.clone(),
                weight: extra.weight,
            }),
            GradesCommand::Update {
                student,
                course,
                score,
                date,
                extra,
                ..
            } => Some(GradeInput {
                student_id: student.clone(),
                course_id: course.clone(),
                numeric_score: *score,
                grade_date: date.clone(),
                description: extra.description.clone(),
                assessment: extra.assessment.clone(),
                weight: extra.weight,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(line: &str) -> Command {
        match parse_line(line).unwrap() {
            ShellInput::Run(cmd) => cmd,
            other => panic!("expected a command, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_exit_and_empty() {
        assert!(matches!(parse_line("exit").unwrap(), ShellInput::Exit));
        assert!(matches!(parse_line("quit").unwrap(), ShellInput::Exit));
        assert!(matches!(parse_line("   ").unwrap(), ShellInput::Empty));
    }

    #[test]
    fn test_parse_help_is_a_message() {
        match parse_line("help").unwrap() {
            ShellInput::Message(e) => {
                assert_eq!(e.kind(), clap::error::ErrorKind::DisplayHelp);
            }
            other => panic!("expected help, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_unknown_command_is_a_message() {
        match parse_line("teachers list").unwrap() {
            ShellInput::Message(e) => {
                assert_ne!(e.kind(), clap::error::ErrorKind::DisplayHelp);
            }
            other => panic!("expected an error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_unbalanced_quotes() {
        assert!(parse_line("students search \"ada").is_err());
    }

    #[test]
    fn test_parse_quoted_words() {
        let cmd = run("students search \"Ada Lovelace\" --size 5");
        assert_eq!(
            cmd,
            Command::Students(StudentsCommand::Search {
                query: "Ada Lovelace".to_string(),
                page: PageArgs { page: 0, size: 5 },
            })
        );
    }

    #[test]
    fn test_students_list_page_request() {
        let cmd = run("students list --page 2 --size 20 --sort-by lastName --sort-dir desc");
        let Command::Students(students) = cmd else {
            panic!("expected students");
        };
        let page = students.page_request().unwrap();
        assert_eq!(page.page, Some(2));
        assert_eq!(page.size, Some(20));
        assert_eq!(page.sort_by.as_deref(), Some("lastName"));
        assert_eq!(page.sort_dir, Some(SortDir::Desc));
    }

    #[test]
    fn test_students_create_requires_fields() {
        assert!(matches!(
            parse_line("students create --first-name Ada").unwrap(),
            ShellInput::Message(_)
        ));

        let Command::Students(cmd) =
            run("students create --first-name Ada --last-name Lovelace --email ada@example.edu")
        else {
            panic!("expected students");
        };
        let input = cmd.input().unwrap();
        assert_eq!(input.first_name.as_deref(), Some("Ada"));
        assert_eq!(input.active, Some(true));
    }

    #[test]
    fn test_grade_update_leaves_unset_fields_empty() {
        let Command::Grades(cmd) = run("grades update g1 --score 91.5") else {
            panic!("expected grades");
        };
        let input = cmd.input().unwrap();
        assert_eq!(input.numeric_score, Some(91.5));
        assert!(input.student_id.is_none());
        assert!(input.grade_date.is_none());
    }

    #[test]
    fn test_export_args() {
        let cmd = run("export student csv --student s1 --out reports");
        assert_eq!(
            cmd,
            Command::Export {
                scope: "student".to_string(),
                format: "csv".to_string(),
                student: Some("s1".to_string()),
                out: Some(PathBuf::from("reports")),
            }
        );
        assert!(matches!(
            parse_line("export grades xlsx").unwrap(),
            ShellInput::Message(_)
        ));
    }

    #[test]
    fn test_session_and_admin_requirements() {
        assert!(!run("login ada --password pw").requires_session());
        assert!(!run("whoami").requires_session());
        assert!(run("dashboard").requires_session());
        assert!(run("grades list").requires_session());

        assert!(run("students delete s1").requires_admin());
        assert!(run("courses create --name Algebra --code MAT101 --credits 3").requires_admin());
        assert!(!run("students list").requires_admin());
        assert!(!run("grades delete g1").requires_admin());
    }
}
