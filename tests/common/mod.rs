//! Shared test infrastructure for integration tests.
#![allow(dead_code)]

use llm_enrich::client::AiClient;
use llm_enrich::error::ProviderError;
use llm_enrich::record::{FieldMap, Outcome, Record};
use llm_enrich::schema::{example_schema, SchemaRegistry};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

type Reply = dyn Fn(usize, &str) -> Result<String, ProviderError> + Send + Sync;

/// Mock AI client whose reply is computed from the call number and prompt.
pub struct ScriptedClient {
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    reply: Box<Reply>,
}

impl ScriptedClient {
    pub fn new(
        reply: impl Fn(usize, &str) -> Result<String, ProviderError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            reply: Box::new(reply),
        }
    }

    /// Answers every prompt correctly.
    pub fn answering() -> Self {
        Self::new(|_, prompt| Ok(answer(prompt)))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts").clone()
    }
}

impl AiClient for ScriptedClient {
    fn send(&self, prompt: &str) -> Result<String, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .expect("prompts")
            .push(prompt.to_string());
        (self.reply)(call, prompt)
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// `(index, company_name)` for each record a batch prompt enumerates.
pub fn requested(prompt: &str) -> Vec<(u64, String)> {
    prompt
        .lines()
        .filter_map(|line| serde_json::from_str::<Value>(line.trim().trim_end_matches(',')).ok())
        .filter_map(|value| {
            let index = value.get("index")?.as_u64()?;
            let name = value.get("company_name")?.as_str()?.to_string();
            Some((index, name))
        })
        .collect()
}

/// Company name a single-record prompt asks about.
pub fn single_subject(prompt: &str) -> Option<String> {
    prompt
        .lines()
        .find_map(|line| line.strip_prefix("company_name: "))
        .map(str::to_string)
}

pub fn industry_of(name: &str) -> String {
    format!("industry of {name}")
}

fn answer_object(name: &str) -> Value {
    json!({
        "industry": industry_of(name),
        "headquarters": format!("{name} City"),
        "founded": "1999",
    })
}

/// A well-behaved model: tagged arrays for batch prompts, one object for
/// single prompts.
pub fn answer(prompt: &str) -> String {
    let rows = requested(prompt);
    if rows.is_empty() {
        let name = single_subject(prompt).unwrap_or_default();
        return answer_object(&name).to_string();
    }
    answer_rows(&rows)
}

/// Fenced JSON array answering exactly `rows`.
pub fn answer_rows(rows: &[(u64, String)]) -> String {
    let answers: Vec<Value> = rows
        .iter()
        .map(|(index, name)| {
            let mut object = answer_object(name);
            object["index"] = json!(index);
            object
        })
        .collect();
    format!("Here you go:\n```json\n{}\n```", Value::Array(answers))
}

pub fn company_records(names: &[&str]) -> Vec<Record> {
    names
        .iter()
        .enumerate()
        .map(|(row, name)| {
            Record::new(
                row,
                FieldMap::from([("company_name".to_string(), json!(name))]),
            )
        })
        .collect()
}

pub fn numbered_companies(count: usize) -> Vec<Record> {
    let names: Vec<String> = (0..count).map(|row| format!("Company{row}")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    company_records(&refs)
}

/// Registry holding the example schema as the active one.
pub fn registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    let schema = example_schema();
    let name = schema.id.clone();
    registry.put(&name, schema).expect("register example schema");
    registry.set_active(&name);
    registry
}

pub fn industry(outcome: &Outcome) -> Option<String> {
    outcome
        .fields()
        .and_then(|fields| fields.get("industry"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
