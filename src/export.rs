//! Report exports: which endpoint to hit and where the file lands.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Csv,
    Pdf,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Csv => "csv",
            Format::Pdf => "pdf",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Some(Format::Csv),
            "pdf" => Some(Format::Pdf),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportKind {
    Students(Format),
    Grades(Format),
    /// One student's grade report
    Student { id: String, format: Format },
}

impl ExportKind {
    /// Parse `students`, `grades` or `student` plus a format; `student` needs an id
    pub fn parse(scope: &str, format: &str, student_id: Option<&str>) -> Option<Self> {
        let format = Format::parse(format)?;
        match scope.to_lowercase().as_str() {
            "students" => Some(ExportKind::Students(format)),
            "grades" => Some(ExportKind::Grades(format)),
            "student" => student_id
                .filter(|id| !id.is_empty())
                .map(|id| ExportKind::Student {
                    id: id.to_string(),
                    format,
                }),
            _ => None,
        }
    }

    pub fn format(&self) -> Format {
        match self {
            ExportKind::Students(f) | ExportKind::Grades(f) => *f,
            ExportKind::Student { format, .. } => *format,
        }
    }

    pub fn path(&self) -> String {
        match self {
            ExportKind::Students(f) => format!("/export/students/{}", f.as_str()),
            ExportKind::Grades(f) => format!("/export/grades/{}", f.as_str()),
            ExportKind::Student { id, format } => {
                format!("/export/student/{}/{}", id, format.as_str())
            }
        }
    }

    pub fn filename(&self) -> String {
        match self {
            ExportKind::Students(f) => format!("students.{}", f.as_str()),
            ExportKind::Grades(f) => format!("grades.{}", f.as_str()),
            ExportKind::Student { id, format } => {
                format!("student-{}-grades.{}", sanitize(id), format.as_str())
            }
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self.format() {
            Format::Csv => "text/csv",
            Format::Pdf => "application/pdf",
        }
    }
}

impl std::fmt::Display for ExportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportKind::Students(fmt) => write!(f, "students ({})", fmt.as_str()),
            ExportKind::Grades(fmt) => write!(f, "grades ({})", fmt.as_str()),
            ExportKind::Student { id, format } => {
                write!(f, "student {} grades ({})", id, format.as_str())
            }
        }
    }
}

/// Ids end up in a filename
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Write export bytes under `dir` using the kind's fixed filename
pub fn save(dir: &Path, kind: &ExportKind, bytes: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create export directory {}", dir.display()))?;
    let path = dir.join(kind.filename());
    fs::write(&path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}
