//! Prompt classifier.
//!
//! Maps a raw question to a coarse [`PromptType`] by keyword matching on an
//! accent-folded, lowercased copy of the text. Categories are tried in
//! declaration order and the first match wins.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptType {
    /// Questions about building a patient health/treatment plan.
    HealthPlan,
    Example,
    Template,
    General,
}

const HEALTH_PLAN_KEYWORDS: &[&str] = &[
    "health plan",
    "healthplan",
    "plano de saude",
    "plano de tratamento",
    "plano de cuidados",
    "exemplo de plano",
    "tratamento oral",
    "cuidados diarios",
];

const EXAMPLE_KEYWORDS: &[&str] = &["exemplo", "example", "caso pratico", "na pratica"];

const TEMPLATE_KEYWORDS: &[&str] = &["modelo", "template", "canva", "pdf"];

impl PromptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptType::HealthPlan => "health_plan",
            PromptType::Example => "example",
            PromptType::Template => "template",
            PromptType::General => "general",
        }
    }

    /// Quick replies offered when the model does not suggest its own.
    pub fn default_quick_replies(&self) -> Vec<String> {
        let labels: &[&str] = match self {
            PromptType::HealthPlan => &["Ver Exemplo de Plano", "Modelo PDF", "Cuidados Diários"],
            PromptType::Example => &["Preciso de exemplo", "Novo Tema"],
            PromptType::Template => &["Modelo no Canva", "Modelo PDF"],
            PromptType::General => &["Preciso de exemplo", "Novo Tema"],
        };
        labels.iter().map(|s| s.to_string()).collect()
    }
}

impl fmt::Display for PromptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn classify(question: &str) -> PromptType {
    let folded = fold(question);
    let has_any = |keywords: &[&str]| keywords.iter().any(|k| folded.contains(k));

    if has_any(HEALTH_PLAN_KEYWORDS) {
        PromptType::HealthPlan
    } else if has_any(EXAMPLE_KEYWORDS) {
        PromptType::Example
    } else if has_any(TEMPLATE_KEYWORDS) {
        PromptType::Template
    } else {
        PromptType::General
    }
}

/// Lowercase, strip Portuguese diacritics, collapse whitespace.
fn fold(text: &str) -> String {
    let mapped: String = text
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}
