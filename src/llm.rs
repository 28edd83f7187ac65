use crate::error::{EduError, Result};
use crate::query_templates::template_for_question;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info};

lazy_static! {
    static ref CODE_FENCE: Regex = Regex::new(r"(?i)^```[a-z]*$").unwrap();
}

/// Turns a natural-language question into SQL text.
///
/// Output is untrusted: it still goes through cleanup, the statement guard
/// and the scope filter before anything runs.
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    /// Generator name for logs (e.g. "openai", "template").
    fn name(&self) -> &str;

    async fn generate(&self, question: &str, schema: &str) -> Result<String>;
}

pub struct LlmClient {
    api_key: String,
    model: String,
    base_url: String,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn call_llm(&self, prompt: &str) -> Result<String> {
        let client = reqwest::Client::new();
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You translate questions into SQLite queries. Return only SQL."},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0,
            "max_tokens": 1000
        });

        let response = client
            .post(&format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| EduError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EduError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        if !status.is_success() {
            let message = response_json["error"]["message"]
                .as_str()
                .unwrap_or("no error message");
            return Err(EduError::Llm(format!("LLM API returned {}: {}", status, message)));
        }

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| EduError::Llm("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }
}

#[async_trait]
impl SqlGenerator for LlmClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, question: &str, schema: &str) -> Result<String> {
        let prompt = build_sql_prompt(question, schema);
        debug!(model = %self.model, "Requesting SQL from LLM");
        self.call_llm(&prompt).await
    }
}

/// Domain prompt: schema, alias conventions and value formats.
pub fn build_sql_prompt(question: &str, schema: &str) -> String {
    format!(
        r#"You are an expert SQL assistant for an educational management system.

Given the following database schema and a user question, generate a valid SQLite SQL query.

Database Schema:
{}

Schema notes:
1. students: student_id, student_name, grade, section, region, attendance_percentage
2. homework: homework_id, title, subject, grade, section, assigned_date, due_date, total_marks
3. submissions: submission_id, homework_id, student_id, submitted_date, is_submitted, is_late, marks_obtained, total_marks
4. performance: performance_id, student_id, subject, assessment_type, assessment_date, marks_obtained, total_marks, percentage, grade_letter
5. quizzes: quiz_id, quiz_title, subject, grade, section, scheduled_date, scheduled_time, duration_minutes, total_marks

Guidelines:
1. Always use table aliases: s for students, h for homework, sub for submissions, p for performance, q for quizzes.
2. Always qualify grade and section with a table alias (s.grade, h.grade).
3. performance has no grade, section or region: JOIN students to get them.
4. is_submitted = 0 means not submitted, is_submitted = 1 means submitted.
5. Use date('now') for the current date.
6. Grades look like 'Grade 6' .. 'Grade 10'; sections are 'A', 'B', 'C'.
7. Regions: 'North Delhi', 'South Delhi', 'East Delhi', 'West Delhi', 'Central Delhi'.

User Question: {}

Return only the SQL query, without markdown or explanations."#,
        schema, question
    )
}

/// Keyword fallback used when no API key is configured.
#[derive(Debug, Clone, Default)]
pub struct TemplateGenerator;

impl TemplateGenerator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SqlGenerator for TemplateGenerator {
    fn name(&self) -> &str {
        "template"
    }

    async fn generate(&self, question: &str, _schema: &str) -> Result<String> {
        Ok(template_for_question(question).to_string())
    }
}

/// Choose the generator for an optional API key.
pub fn generator_for(api_key: Option<String>, model: String, base_url: String) -> Box<dyn SqlGenerator> {
    match api_key {
        Some(key) => {
            info!(model = %model, "Using LLM SQL generation");
            Box::new(LlmClient::new(key, model, base_url))
        }
        None => {
            info!("OPENAI_API_KEY not set, using keyword templates");
            Box::new(TemplateGenerator::new())
        }
    }
}

/// Strip chat formatting from generated SQL.
///
/// Removes everything up to a `SQLQuery:` marker, markdown code fence lines,
/// surrounding whitespace and one trailing semicolon.
pub fn clean_generated_sql(raw: &str) -> String {
    let mut text = raw.trim();

    if let Some(pos) = text.rfind("SQLQuery:") {
        text = text[pos + "SQLQuery:".len()..].trim();
    }

    let unfenced = if text.contains("```") {
        text.lines()
            .map(str::trim_end)
            .filter(|line| !CODE_FENCE.is_match(line.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        text.to_string()
    };

    let cleaned = unfenced.trim();
    cleaned
        .strip_suffix(';')
        .unwrap_or(cleaned)
        .trim_end()
        .to_string()
}
