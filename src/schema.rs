//! Artifact schemas produced by the pipelines: quiz question sets, mind
//! maps, and the salvage-recovered question shapes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Complete quiz document, as produced by a strict stage-3 parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizDocument {
    /// Multiple-choice questions with options labeled `A`-`D`.
    #[serde(default)]
    pub multiple_choice_questions: Vec<MultipleChoiceQuestion>,
    /// True-or-false questions.
    #[serde(default)]
    pub true_or_false_questions: Vec<TrueFalseQuestion>,
}

/// One multiple-choice question.
///
/// Options are a sorted map rather than a fixed struct because salvage may
/// recover only a subset of the `A`-`D` labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipleChoiceQuestion {
    /// Question text.
    pub question: String,
    /// Option label (`A`-`D`) to option text.
    pub options: BTreeMap<String, String>,
    /// Label of the correct option.
    pub correct_option: String,
}

/// One true-or-false question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrueFalseQuestion {
    /// Statement the quiz taker judges.
    pub statement: String,
    /// Display text for each side.
    pub options: TrueFalseOptions,
    /// `"True"` or `"False"`.
    pub correct_option: String,
}

/// Display text pair for a true-or-false question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrueFalseOptions {
    /// Text shown for the true side.
    #[serde(rename = "True")]
    pub when_true: String,
    /// Text shown for the false side.
    #[serde(rename = "False")]
    pub when_false: String,
}

impl Default for TrueFalseOptions {
    fn default() -> Self {
        Self {
            when_true: "True".to_string(),
            when_false: "False".to_string(),
        }
    }
}

/// A question recovered by salvage. Serializes without a tag, so consumers
/// branch on field presence (`question` vs `statement`) exactly as the
/// collapsed `{"questions": [...]}` shape demands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecoveredQuestion {
    /// MCQ-shaped recovery.
    MultipleChoice(MultipleChoiceQuestion),
    /// Statement-shaped recovery.
    TrueFalse(TrueFalseQuestion),
}

/// Mind-map tree derived from a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MindMap {
    /// Document title.
    pub title: String,
    /// Top-level topics.
    pub nodes: Vec<MindMapNode>,
}

/// One mind-map node; children are omitted from the serialized form when
/// absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MindMapNode {
    /// Stable node identifier (e.g. `"1.2"`).
    pub id: String,
    /// Node label.
    pub text: String,
    /// Child nodes, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<MindMapNode>>,
}
