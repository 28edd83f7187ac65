//! Synthetic school dataset.
//!
//! Generates students, homework, submissions, quizzes, assessment results and
//! the admin user-role table, and writes each as a CSV file named after the
//! table it is loaded into. Generation is deterministic for a given seed and
//! reference date.

use crate::error::Result;
use crate::security::policy::{Role, UserRecord, ALL_SENTINEL};
use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const GRADES: [&str; 5] = ["Grade 6", "Grade 7", "Grade 8", "Grade 9", "Grade 10"];
pub const SECTIONS: [&str; 3] = ["A", "B", "C"];
pub const REGIONS: [&str; 5] = [
    "North Delhi",
    "South Delhi",
    "East Delhi",
    "West Delhi",
    "Central Delhi",
];
pub const SUBJECTS: [&str; 6] = [
    "Mathematics",
    "Science",
    "English",
    "Social Studies",
    "Hindi",
    "Computer Science",
];

const FIRST_NAMES: [&str; 20] = [
    "Aarav", "Vivaan", "Aditya", "Vihaan", "Arjun", "Reyansh", "Ayaan", "Krishna", "Ishaan",
    "Shaurya", "Anaya", "Aadhya", "Diya", "Pihu", "Prisha", "Inaya", "Riya", "Anvi", "Kavya",
    "Khushi",
];
const LAST_NAMES: [&str; 10] = [
    "Sharma", "Verma", "Gupta", "Singh", "Kumar", "Agarwal", "Jain", "Bansal", "Mittal", "Saxena",
];
const ASSESSMENT_TYPES: [&str; 4] = ["Quiz", "Test", "Project", "Assignment"];
const TOPIC_KINDS: [&str; 4] = ["Basics", "Advanced", "Problem Solving", "Applications"];

/// Grade coordinators seeded into the admin table: (full name, grade, region).
const COORDINATORS: [(&str, &str, &str); 5] = [
    ("Priya Sharma", "Grade 6", "North Delhi"),
    ("Rajesh Kumar", "Grade 7", "South Delhi"),
    ("Anjali Gupta", "Grade 8", "East Delhi"),
    ("Vikram Singh", "Grade 9", "West Delhi"),
    ("Sunita Verma", "Grade 10", "Central Delhi"),
];

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub student_id: u32,
    pub student_name: String,
    pub grade: String,
    pub section: String,
    pub region: String,
    pub enrollment_date: String,
    pub parent_contact: String,
    pub email: String,
    pub attendance_percentage: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Homework {
    pub homework_id: u32,
    pub title: String,
    pub subject: String,
    pub grade: String,
    pub section: String,
    pub assigned_date: String,
    pub due_date: String,
    pub total_marks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub submission_id: u32,
    pub homework_id: u32,
    pub student_id: u32,
    pub submitted_date: Option<String>,
    pub is_submitted: bool,
    pub is_late: bool,
    pub marks_obtained: u32,
    pub total_marks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quiz {
    pub quiz_id: u32,
    pub quiz_title: String,
    pub subject: String,
    pub grade: String,
    pub section: String,
    pub scheduled_date: String,
    pub scheduled_time: String,
    pub duration_minutes: u32,
    pub total_marks: u32,
    pub syllabus_topics: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Performance {
    pub performance_id: u32,
    pub student_id: u32,
    pub subject: String,
    pub assessment_type: String,
    pub assessment_date: String,
    pub marks_obtained: u32,
    pub total_marks: u32,
    pub percentage: u32,
    pub grade_letter: String,
}

/// All generated tables.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub students: Vec<Student>,
    pub homework: Vec<Homework>,
    pub submissions: Vec<Submission>,
    pub quizzes: Vec<Quiz>,
    pub performance: Vec<Performance>,
    pub admin_users: Vec<UserRecord>,
}

impl Dataset {
    /// Write every table to `<dir>/<table>.csv`, returning the written paths.
    pub fn write_csv(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let written = vec![
            write_table(dir, "students", &self.students)?,
            write_table(dir, "homework", &self.homework)?,
            write_table(dir, "submissions", &self.submissions)?,
            write_table(dir, "quizzes", &self.quizzes)?,
            write_table(dir, "performance", &self.performance)?,
            write_table(dir, "admin_users", &self.admin_users)?,
        ];

        info!(
            "Wrote dataset to {}: {} students, {} homework, {} submissions, {} quizzes, {} assessments, {} users",
            dir.display(),
            self.students.len(),
            self.homework.len(),
            self.submissions.len(),
            self.quizzes.len(),
            self.performance.len(),
            self.admin_users.len()
        );
        Ok(written)
    }
}

fn write_table<T: Serialize>(dir: &Path, table: &str, rows: &[T]) -> Result<PathBuf> {
    let path = dir.join(format!("{}.csv", table));
    let mut wtr = csv::Writer::from_path(&path)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(path)
}

/// Seeded generator for the synthetic dataset.
pub struct DatasetGenerator {
    rng: StdRng,
}

impl DatasetGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generate all tables relative to `today`.
    pub fn generate(&mut self, today: NaiveDate) -> Dataset {
        let students = self.students(today);
        let homework = self.homework(today);
        let submissions = self.submissions(&students, &homework);
        let quizzes = self.quizzes(today);
        let performance = self.performance(today, &students);
        let admin_users = self.admin_users();

        Dataset {
            students,
            homework,
            submissions,
            quizzes,
            performance,
            admin_users,
        }
    }

    fn pick<'a>(&mut self, items: &[&'a str]) -> &'a str {
        items[self.rng.gen_range(0..items.len())]
    }

    fn person_name(&mut self) -> String {
        format!("{} {}", self.pick(&FIRST_NAMES), self.pick(&LAST_NAMES))
    }

    fn students(&mut self, today: NaiveDate) -> Vec<Student> {
        let mut students = Vec::new();
        let mut student_id = 1000;

        for grade in GRADES {
            for section in SECTIONS {
                let class_size = self.rng.gen_range(25..=30);
                for _ in 0..class_size {
                    let enrolled = today - Duration::days(self.rng.gen_range(30..=365));
                    students.push(Student {
                        student_id,
                        student_name: self.person_name(),
                        grade: grade.to_string(),
                        section: section.to_string(),
                        region: self.pick(&REGIONS).to_string(),
                        enrollment_date: enrolled.format(DATE_FORMAT).to_string(),
                        parent_contact: format!("9{}", self.rng.gen_range(100_000_000..=999_999_999u32)),
                        email: format!("student{}@school.edu", student_id),
                        attendance_percentage: self.rng.gen_range(75..=98),
                    });
                    student_id += 1;
                }
            }
        }

        students
    }

    fn homework(&mut self, today: NaiveDate) -> Vec<Homework> {
        let mut homework = Vec::new();
        let mut homework_id = 1;

        for grade in GRADES {
            for section in SECTIONS {
                for subject in SUBJECTS {
                    let count = self.rng.gen_range(5..=8);
                    for number in 1..=count {
                        let due = today + Duration::days(self.rng.gen_range(-30..=15));
                        homework.push(Homework {
                            homework_id,
                            title: format!("{} Assignment {}", subject, number),
                            subject: subject.to_string(),
                            grade: grade.to_string(),
                            section: section.to_string(),
                            assigned_date: (due - Duration::days(7)).format(DATE_FORMAT).to_string(),
                            due_date: due.format(DATE_FORMAT).to_string(),
                            total_marks: *[10, 15, 20, 25].get(self.rng.gen_range(0..4)).unwrap_or(&10),
                        });
                        homework_id += 1;
                    }
                }
            }
        }

        homework
    }

    fn submissions(&mut self, students: &[Student], homework: &[Homework]) -> Vec<Submission> {
        let mut submissions = Vec::new();
        let mut submission_id = 1;

        for hw in homework {
            let due = NaiveDate::parse_from_str(&hw.due_date, DATE_FORMAT).ok();
            let class = students
                .iter()
                .filter(|s| s.grade == hw.grade && s.section == hw.section);

            for student in class {
                let submission = if self.rng.gen_bool(0.85) {
                    let submitted = due.map(|d| d + Duration::days(self.rng.gen_range(-7..=2)));
                    let is_late = matches!((submitted, due), (Some(s), Some(d)) if s > d);
                    Submission {
                        submission_id,
                        homework_id: hw.homework_id,
                        student_id: student.student_id,
                        submitted_date: submitted.map(|d| d.format(DATE_FORMAT).to_string()),
                        is_submitted: true,
                        is_late,
                        marks_obtained: self.rng.gen_range(hw.total_marks / 2..=hw.total_marks),
                        total_marks: hw.total_marks,
                    }
                } else {
                    Submission {
                        submission_id,
                        homework_id: hw.homework_id,
                        student_id: student.student_id,
                        submitted_date: None,
                        is_submitted: false,
                        is_late: false,
                        marks_obtained: 0,
                        total_marks: hw.total_marks,
                    }
                };
                submissions.push(submission);
                submission_id += 1;
            }
        }

        submissions
    }

    fn quizzes(&mut self, today: NaiveDate) -> Vec<Quiz> {
        let mut quizzes = Vec::new();
        let mut quiz_id = 1;

        for grade in GRADES {
            for section in SECTIONS {
                for subject in SUBJECTS {
                    if !self.rng.gen_bool(0.7) {
                        continue;
                    }
                    let date = today + Duration::days(self.rng.gen_range(1..=14));
                    let minute = if self.rng.gen_bool(0.5) { "00" } else { "30" };
                    quizzes.push(Quiz {
                        quiz_id,
                        quiz_title: format!("{} Quiz - Chapter {}", subject, self.rng.gen_range(1..=8)),
                        subject: subject.to_string(),
                        grade: grade.to_string(),
                        section: section.to_string(),
                        scheduled_date: date.format(DATE_FORMAT).to_string(),
                        scheduled_time: format!("{}:{}", self.rng.gen_range(9..=15), minute),
                        duration_minutes: *[30, 45, 60].get(self.rng.gen_range(0..3)).unwrap_or(&45),
                        total_marks: *[20, 25, 30, 35].get(self.rng.gen_range(0..4)).unwrap_or(&25),
                        syllabus_topics: format!(
                            "Chapter {} - {}",
                            self.rng.gen_range(1..=5),
                            self.pick(&TOPIC_KINDS)
                        ),
                    });
                    quiz_id += 1;
                }
            }
        }

        quizzes
    }

    fn performance(&mut self, today: NaiveDate, students: &[Student]) -> Vec<Performance> {
        let mut performance = Vec::new();
        let mut performance_id = 1;

        for grade in GRADES {
            for section in SECTIONS {
                let class: Vec<&Student> = students
                    .iter()
                    .filter(|s| s.grade == grade && s.section == section)
                    .collect();

                for subject in SUBJECTS {
                    let assessments = self.rng.gen_range(2..=3);
                    for _ in 0..assessments {
                        let date = today - Duration::days(self.rng.gen_range(1..=28));
                        let assessment_type = self.pick(&ASSESSMENT_TYPES);

                        for student in &class {
                            if !self.rng.gen_bool(0.9) {
                                continue;
                            }
                            let base = self.rng.gen_range(60..=95) as f64;
                            let attendance = student.attendance_percentage as f64 / 100.0;
                            let score = ((base * (0.7 + 0.3 * attendance)) as u32).min(100);

                            performance.push(Performance {
                                performance_id,
                                student_id: student.student_id,
                                subject: subject.to_string(),
                                assessment_type: assessment_type.to_string(),
                                assessment_date: date.format(DATE_FORMAT).to_string(),
                                marks_obtained: score,
                                total_marks: 100,
                                percentage: score,
                                grade_letter: letter_grade(score).to_string(),
                            });
                            performance_id += 1;
                        }
                    }
                }
            }
        }

        performance
    }

    fn admin_users(&mut self) -> Vec<UserRecord> {
        let mut users = Vec::new();
        let mut admin_id = 1;

        let mut root = UserRecord::new(
            "super_admin",
            "Super Administrator",
            Role::SuperAdmin,
            ALL_SENTINEL,
            ALL_SENTINEL,
            ALL_SENTINEL,
        );
        root.admin_id = Some(admin_id);
        root.email = Some("super.admin@school.edu".to_string());
        root.created_date = Some("2024-01-01".to_string());
        users.push(root);
        admin_id += 1;

        for (name, grade, region) in COORDINATORS {
            let mut user = UserRecord::new(
                name.to_lowercase().replace(' ', "_"),
                name,
                Role::GradeCoordinator,
                grade,
                ALL_SENTINEL,
                region,
            );
            user.admin_id = Some(admin_id);
            user.email = Some(format!("{}@school.edu", name.to_lowercase().replace(' ', ".")));
            user.created_date = Some("2024-01-15".to_string());
            users.push(user);
            admin_id += 1;
        }

        for grade in GRADES {
            for section in SECTIONS {
                let class_key = format!("{}{}", grade.to_lowercase().replace(' ', ""), section.to_lowercase());
                let full_name = self.person_name();
                let region = self.pick(&REGIONS);
                let mut user = UserRecord::new(
                    format!("teacher_{}", class_key),
                    full_name,
                    Role::SectionTeacher,
                    grade,
                    section,
                    region,
                );
                user.admin_id = Some(admin_id);
                user.email = Some(format!("teacher.{}@school.edu", class_key));
                user.created_date = Some("2024-02-01".to_string());
                users.push(user);
                admin_id += 1;
            }
        }

        users
    }
}

/// Letter grade for a percentage: A from 90, B from 80, C from 70, D below.
pub fn letter_grade(score: u32) -> &'static str {
    match score {
        90.. => "A",
        80..=89 => "B",
        70..=79 => "C",
        _ => "D",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::user_manager::UserDirectory;
    use tempfile::TempDir;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    #[test]
    fn test_generation_is_deterministic() {
        let a = DatasetGenerator::new(42).generate(today());
        let b = DatasetGenerator::new(42).generate(today());
        assert_eq!(a.students.len(), b.students.len());
        assert_eq!(a.submissions.len(), b.submissions.len());
        assert_eq!(a.students[7].student_name, b.students[7].student_name);
    }

    #[test]
    fn test_class_sizes_and_attendance_bounds() {
        let data = DatasetGenerator::new(7).generate(today());
        for grade in GRADES {
            for section in SECTIONS {
                let size = data
                    .students
                    .iter()
                    .filter(|s| s.grade == grade && s.section == section)
                    .count();
                assert!((25..=30).contains(&size), "{} {} has {}", grade, section, size);
            }
        }
        assert!(data
            .students
            .iter()
            .all(|s| (75..=98).contains(&s.attendance_percentage)));
    }

    #[test]
    fn test_admin_users_follow_seeding_convention() {
        let data = DatasetGenerator::new(1).generate(today());
        assert_eq!(data.admin_users.len(), 21);

        let admins: Vec<_> = data
            .admin_users
            .iter()
            .filter(|u| u.role == Role::SuperAdmin)
            .collect();
        assert_eq!(admins.len(), 1);
        assert_eq!(admins[0].assigned_grades, ALL_SENTINEL);
        assert_eq!(admins[0].assigned_sections, ALL_SENTINEL);
        assert_eq!(admins[0].assigned_regions, ALL_SENTINEL);

        assert!(data.admin_users.iter().any(|u| u.username == "priya_sharma"));
        assert!(data.admin_users.iter().any(|u| u.username == "teacher_grade6a"));
        assert!(data.admin_users.iter().any(|u| u.username == "teacher_grade10c"));
    }

    #[test]
    fn test_submissions_cover_each_class_member() {
        let data = DatasetGenerator::new(3).generate(today());
        let hw = &data.homework[0];
        let class_size = data
            .students
            .iter()
            .filter(|s| s.grade == hw.grade && s.section == hw.section)
            .count();
        let rows = data
            .submissions
            .iter()
            .filter(|s| s.homework_id == hw.homework_id)
            .count();
        assert_eq!(rows, class_size);
        assert!(data
            .submissions
            .iter()
            .filter(|s| !s.is_submitted)
            .all(|s| s.submitted_date.is_none() && s.marks_obtained == 0));
    }

    #[test]
    fn test_quizzes_are_upcoming() {
        let data = DatasetGenerator::new(5).generate(today());
        let start = today().format(DATE_FORMAT).to_string();
        let end = (today() + Duration::days(14)).format(DATE_FORMAT).to_string();
        assert!(data
            .quizzes
            .iter()
            .all(|q| q.scheduled_date > start && q.scheduled_date <= end));
    }

    #[test]
    fn test_letter_grades() {
        assert_eq!(letter_grade(95), "A");
        assert_eq!(letter_grade(90), "A");
        assert_eq!(letter_grade(85), "B");
        assert_eq!(letter_grade(70), "C");
        assert_eq!(letter_grade(42), "D");
    }

    #[test]
    fn test_written_admin_table_loads_as_directory() {
        let temp_dir = TempDir::new().unwrap();
        let data = DatasetGenerator::new(11).generate(today());
        let paths = data.write_csv(temp_dir.path()).unwrap();
        assert_eq!(paths.len(), 6);

        let directory = UserDirectory::from_csv_path(temp_dir.path().join("admin_users.csv")).unwrap();
        assert_eq!(directory.len(), 21);
        assert!(directory.resolve("super_admin").unwrap().unrestricted);
        assert!(!directory.resolve("teacher_grade8b").unwrap().unrestricted);
    }
}
