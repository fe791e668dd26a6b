//! Plain-text rendering of service records for the terminal.

use crate::models::{Course, Grade, Page, Statistics, Student};
use std::fmt::Write;

/// A missing average means no grades yet; a real zero prints as `0.00`
pub fn format_average(avg: Option<f64>) -> String {
    match avg {
        Some(v) => format!("{:.2}", v),
        None => "No grades".to_string(),
    }
}

fn format_optional(v: Option<f64>, decimals: usize) -> String {
    match v {
        Some(v) => format!("{:.*}", decimals, v),
        None => "N/A".to_string(),
    }
}

/// Left-aligned columns sized to the widest cell
pub fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
    }

    let mut out = String::new();
    let _ = writeln!(out, "{}", render_row(headers.iter().copied(), &widths));
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    let _ = writeln!(out, "{}", rule.join("  "));
    for row in rows {
        let _ = writeln!(out, "{}", render_row(row.iter().map(String::as_str), &widths));
    }
    out
}

fn render_row<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    let line: Vec<String> = cells
        .zip(widths)
        .map(|(c, w)| format!("{:<width$}", c, width = *w))
        .collect();
    line.join("  ").trim_end().to_string()
}

pub fn page_footer<T>(page: &Page<T>) -> String {
    format!(
        "page {} of {} ({} total)",
        page.number + 1,
        page.total_pages.max(1),
        page.total_elements
    )
}

pub fn students_table(students: &[Student]) -> String {
    let rows: Vec<Vec<String>> = students
        .iter()
        .map(|s| {
            vec![
                s.id.clone(),
                s.full_name(),
                s.email.clone(),
                s.enrollment_id.clone().unwrap_or_default(),
                if s.active { "active" } else { "inactive" }.to_string(),
                format_average(s.average_grade),
            ]
        })
        .collect();
    table(
        &["ID", "NAME", "EMAIL", "ENROLLMENT", "STATUS", "AVERAGE"],
        &rows,
    )
}

pub fn student_detail(s: &Student) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} ({})", s.full_name(), s.id);
    let _ = writeln!(out, "  Email:      {}", s.email);
    if let Some(phone) = &s.phone_number {
        let _ = writeln!(out, "  Phone:      {}", phone);
    }
    if let Some(address) = &s.address {
        let _ = writeln!(out, "  Address:    {}", address);
    }
    if let Some(enrollment) = &s.enrollment_id {
        let _ = writeln!(out, "  Enrollment: {}", enrollment);
    }
    let _ = writeln!(
        out,
        "  Status:     {}",
        s.status
            .clone()
            .unwrap_or_else(|| if s.active { "active" } else { "inactive" }.to_string())
    );
    let _ = writeln!(out, "  Average:    {}", format_average(s.average_grade));
    if let Some(total) = s.total_grades {
        let _ = writeln!(out, "  Grades:     {}", total);
    }
    out
}

pub fn courses_table(courses: &[Course]) -> String {
    let rows: Vec<Vec<String>> = courses
        .iter()
        .map(|c| {
            vec![
                c.id.clone(),
                c.code.clone(),
                c.name.clone(),
                c.credits.to_string(),
                c.enrolled_students.map(|n| n.to_string()).unwrap_or_default(),
                format_optional(c.average_grade, 2),
            ]
        })
        .collect();
    table(&["ID", "CODE", "NAME", "CREDITS", "STUDENTS", "AVERAGE"], &rows)
}

pub fn grades_table(grades: &[Grade]) -> String {
    let rows: Vec<Vec<String>> = grades
        .iter()
        .map(|g| {
            vec![
                g.id.clone(),
                g.student_name.clone().unwrap_or_else(|| g.student_id.clone()),
                g.course_code
                    .clone()
                    .or_else(|| g.course_name.clone())
                    .unwrap_or_else(|| g.course_id.clone()),
                g.assessment.clone().unwrap_or_default(),
                format!("{:.2}", g.numeric_score),
                g.letter_grade.clone().unwrap_or_default(),
                format!("{}", g.weight),
                g.grade_date.clone(),
            ]
        })
        .collect();
    table(
        &["ID", "STUDENT", "COURSE", "ASSESSMENT", "SCORE", "LETTER", "WEIGHT", "DATE"],
        &rows,
    )
}

fn percent(part: u64, total: u64) -> String {
    if total == 0 {
        return "0%".to_string();
    }
    format!("{:.0}%", part as f64 * 100.0 / total as f64)
}

pub fn dashboard(stats: &Statistics) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Students: {} ({} active)", stats.total_students, stats.active_students);
    let _ = writeln!(out, "Courses:  {}", stats.total_courses);
    let _ = writeln!(out, "Grades:   {}", stats.total_grades);
    let _ = writeln!(out, "Average:  {}", format_optional(stats.overall_average, 1));
    let _ = writeln!(
        out,
        "Median {}  High {}  Low {}  Std dev {}",
        format_optional(stats.median, 2),
        format_optional(stats.highest_score, 2),
        format_optional(stats.lowest_score, 2),
        format_optional(stats.standard_deviation, 2)
    );

    let total = stats.distribution.total();
    let _ = writeln!(out, "\nDistribution:");
    for (letter, count) in stats.distribution.buckets() {
        let _ = writeln!(out, "  {}: {:>4}  {:>4}", letter, count, percent(count, total));
    }

    if !stats.top_students.is_empty() {
        let _ = writeln!(out, "\nTop students:");
        let rows: Vec<Vec<String>> = stats
            .top_students
            .iter()
            .enumerate()
            .map(|(i, s)| {
                vec![
                    format!("{}", i + 1),
                    s.student_name.clone(),
                    format!("{:.2}", s.average_grade),
                    s.total_grades.to_string(),
                ]
            })
            .collect();
        out.push_str(&table(&["#", "STUDENT", "AVERAGE", "GRADES"], &rows));
    }

    if !stats.course_performances.is_empty() {
        let _ = writeln!(out, "\nCourse performance:");
        let rows: Vec<Vec<String>> = stats
            .course_performances
            .iter()
            .map(|c| {
                vec![
                    c.course_code.clone(),
                    c.course_name.clone(),
                    format!("{:.2}", c.average_grade),
                    c.total_students.to_string(),
                ]
            })
            .collect();
        out.push_str(&table(&["CODE", "COURSE", "AVERAGE", "STUDENTS"], &rows));
    }
    out
}
