//! Canned SQL: the quick-query catalogue and the keyword templates used when
//! no LLM is configured.
//!
//! Every query here names the `students` table as `s` so the scope filter can
//! qualify its columns, and relies on the filter injector for row scoping.

use crate::error::{EduError, Result};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct QuickQuery {
    /// Stable identifier used by the CLI and the API.
    pub name: &'static str,
    pub title: &'static str,
    pub sql: &'static str,
}

pub const QUICK_QUERIES: &[QuickQuery] = &[
    QuickQuery {
        name: "missing_homework",
        title: "Missing Homework Submissions",
        sql: "SELECT DISTINCT s.student_name, s.grade, s.section, h.title AS homework_title, h.due_date, h.subject \
              FROM students s \
              JOIN submissions sub ON s.student_id = sub.student_id \
              JOIN homework h ON sub.homework_id = h.homework_id \
              WHERE sub.is_submitted = 0 AND h.due_date >= date('now', '-7 days') \
              ORDER BY h.due_date DESC, s.grade, s.section, s.student_name",
    },
    QuickQuery {
        name: "grade8_performance",
        title: "Grade 8 Performance (Last Week)",
        sql: "SELECT s.student_name, s.grade, s.section, p.subject, p.assessment_type, p.assessment_date, p.percentage \
              FROM performance p \
              JOIN students s ON p.student_id = s.student_id \
              WHERE s.grade = 'Grade 8' AND p.assessment_date >= date('now', '-7 days') \
              ORDER BY p.assessment_date DESC, s.student_name",
    },
    QuickQuery {
        name: "upcoming_quizzes",
        title: "Upcoming Quizzes (Next 2 Weeks)",
        sql: "SELECT q.quiz_title, q.subject, q.grade, q.section, q.scheduled_date, q.scheduled_time, q.duration_minutes \
              FROM quizzes q \
              JOIN students s ON q.grade = s.grade AND q.section = s.section \
              WHERE q.scheduled_date BETWEEN date('now') AND date('now', '+14 days') \
              GROUP BY q.quiz_id, q.quiz_title, q.subject, q.grade, q.section, q.scheduled_date, q.scheduled_time, q.duration_minutes \
              ORDER BY q.scheduled_date, q.scheduled_time",
    },
    QuickQuery {
        name: "attendance_summary",
        title: "Attendance Summary",
        sql: "SELECT s.grade, s.section, COUNT(*) AS total_students, \
              ROUND(AVG(s.attendance_percentage), 1) AS avg_attendance, \
              COUNT(CASE WHEN s.attendance_percentage < 80 THEN 1 END) AS low_attendance_count \
              FROM students s \
              GROUP BY s.grade, s.section \
              ORDER BY s.grade, s.section",
    },
    QuickQuery {
        name: "performance_by_subject",
        title: "Performance by Subject (Last Month)",
        sql: "SELECT p.subject, COUNT(*) AS total_assessments, \
              ROUND(AVG(p.percentage), 1) AS avg_percentage, \
              COUNT(CASE WHEN p.percentage >= 80 THEN 1 END) AS good_performance_count \
              FROM performance p \
              JOIN students s ON p.student_id = s.student_id \
              WHERE p.assessment_date >= date('now', '-30 days') \
              GROUP BY p.subject \
              ORDER BY avg_percentage DESC",
    },
    QuickQuery {
        name: "low_attendance",
        title: "Students with Low Attendance",
        sql: "SELECT s.student_name, s.grade, s.section, s.attendance_percentage, s.parent_contact, s.region \
              FROM students s \
              WHERE s.attendance_percentage < 80 \
              ORDER BY s.attendance_percentage ASC",
    },
];

/// Look up a quick query by `name`, case-insensitively.
///
/// An unknown name is a [`EduError::Template`] that suggests the closest
/// catalogue entry.
pub fn find_quick_query(name: &str) -> Result<&'static QuickQuery> {
    let wanted = name.trim();
    if let Some(query) = QUICK_QUERIES
        .iter()
        .find(|q| q.name.eq_ignore_ascii_case(wanted))
    {
        return Ok(query);
    }

    let suggestion = QUICK_QUERIES
        .iter()
        .map(|q| (q.name, strsim::jaro_winkler(&wanted.to_lowercase(), q.name)))
        .filter(|(_, score)| *score >= 0.7)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(name, _)| name);

    Err(EduError::Template(match suggestion {
        Some(s) => format!("unknown quick query '{}', did you mean '{}'?", name, s),
        None => format!("unknown quick query '{}'", name),
    }))
}

pub(crate) const HOMEWORK_TEMPLATE: &str = "SELECT DISTINCT s.student_name, s.grade, s.section, h.title AS homework_title, h.due_date, h.subject \
     FROM students s \
     JOIN submissions sub ON s.student_id = sub.student_id \
     JOIN homework h ON sub.homework_id = h.homework_id \
     WHERE sub.is_submitted = 0";

pub(crate) const PERFORMANCE_TEMPLATE: &str = "SELECT s.student_name, s.grade, s.section, p.subject, p.assessment_type, p.assessment_date, p.percentage \
     FROM performance p \
     JOIN students s ON p.student_id = s.student_id";

pub(crate) const ATTENDANCE_TEMPLATE: &str = "SELECT s.student_name, s.grade, s.section, s.attendance_percentage \
     FROM students s \
     WHERE s.attendance_percentage < 80";

pub(crate) const QUIZZES_TEMPLATE: &str = "SELECT DISTINCT q.quiz_title, q.subject, q.grade, q.section, q.scheduled_date, q.scheduled_time \
     FROM quizzes q \
     JOIN students s ON q.grade = s.grade AND q.section = s.section";

/// Pick a template by keyword. Unmatched questions get the homework template.
pub fn template_for_question(question: &str) -> &'static str {
    let q = question.to_lowercase();

    if q.contains("homework")
        && (q.contains("not submitted") || q.contains("missing") || q.contains("haven't"))
    {
        HOMEWORK_TEMPLATE
    } else if q.contains("performance") || q.contains("grade") {
        PERFORMANCE_TEMPLATE
    } else if q.contains("attendance") && q.contains("low") {
        ATTENDANCE_TEMPLATE
    } else if q.contains("quiz") || q.contains("upcoming") {
        QUIZZES_TEMPLATE
    } else {
        HOMEWORK_TEMPLATE
    }
}

pub fn sample_questions() -> Vec<&'static str> {
    vec![
        "Which students haven't submitted their homework yet?",
        "Show me performance data for Grade 8 from last week",
        "List all upcoming quizzes scheduled for next week",
        "What is the average attendance by grade?",
        "Which subjects have the lowest average performance?",
        "Show me students with attendance below 80%",
        "List all homework assignments due this week",
        "What are the top performing students in Mathematics?",
        "Show quiz schedules for Grade 7 students",
        "Which students submitted homework late last week?",
    ]
}
