//! Validated inputs and presentation views exposed by the client surfaces.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::dao::models::{GameRecord, QuestionRecord, StoredPhase};

/// Payload used to create a brand-new game.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateGameInput {
    /// Display title of the quiz.
    #[validate(length(min = 3, max = 100, message = "title must be 3 to 100 characters"))]
    pub title: String,
    /// Optional free-form description.
    #[serde(default)]
    #[validate(length(max = 500, message = "description must be at most 500 characters"))]
    pub description: String,
    /// Optional category; defaults to `other`.
    #[serde(default)]
    pub category: Option<String>,
}

impl CreateGameInput {
    /// Category label, defaulting to `other` when none was chosen.
    pub fn category_or_default(&self) -> String {
        self.category
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or("other")
            .to_string()
    }
}

/// Payload used to append a question to a game in the lobby.
#[derive(Debug, Clone, Deserialize)]
pub struct QuestionInput {
    /// Prompt text.
    pub text: String,
    /// Canonical correct answer.
    pub correct_answer: String,
    /// Exactly three incorrect answers, all non-empty.
    pub incorrect_answers: Vec<String>,
    /// Points awarded on a correct answer; at least 10.
    pub points: u32,
}

/// Minimum point value a question may carry.
pub const MIN_QUESTION_POINTS: u32 = 10;

impl Validate for QuestionInput {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.text.trim().is_empty() {
            errors.add("text", field_error("text_empty", "question text must not be empty"));
        }

        if self.correct_answer.trim().is_empty() {
            errors.add(
                "correct_answer",
                field_error("correct_answer_empty", "correct answer must not be empty"),
            );
        }

        if let Err(e) = validate_incorrect_answers(&self.incorrect_answers) {
            errors.add("incorrect_answers", e);
        }

        if self.points < MIN_QUESTION_POINTS {
            errors.add(
                "points",
                field_error(
                    "points_too_low",
                    format!("points must be at least {MIN_QUESTION_POINTS}"),
                ),
            );
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Payload used by a player to join a game.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct JoinGameInput {
    /// Display name shown on the leaderboard.
    #[validate(length(min = 1, max = 50, message = "player name must be 1 to 50 characters"))]
    pub player_name: String,
}

/// Validates that a question carries exactly three non-empty wrong answers.
pub fn validate_incorrect_answers(answers: &[String]) -> Result<(), ValidationError> {
    if answers.len() != 3 {
        let mut err = ValidationError::new("incorrect_answer_count");
        err.message =
            Some(format!("expected exactly 3 incorrect answers (got {})", answers.len()).into());
        return Err(err);
    }

    if answers.iter().any(|answer| answer.trim().is_empty()) {
        let mut err = ValidationError::new("incorrect_answer_empty");
        err.message = Some("incorrect answers must not be empty".into());
        return Err(err);
    }

    Ok(())
}

fn field_error(code: &'static str, message: impl Into<String>) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into().into());
    err
}

/// Summary of a game returned once created or loaded.
#[derive(Debug, Clone, Serialize)]
pub struct GameSummary {
    /// Game identity; doubles as the join code.
    pub id: Uuid,
    /// Display title.
    pub title: String,
    /// Free-form description.
    pub description: String,
    /// Category label.
    pub category: String,
    /// Current lifecycle phase.
    pub phase: StoredPhase,
}

impl From<&GameRecord> for GameSummary {
    fn from(record: &GameRecord) -> Self {
        Self {
            id: record.id,
            title: record.title.clone(),
            description: record.description.clone(),
            category: record.category.clone(),
            phase: record.phase,
        }
    }
}

/// Presentation view of one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionView {
    /// Question identity.
    pub question_id: Uuid,
    /// Zero-based presentation index.
    pub position: usize,
    /// Number of questions known to the viewing client.
    pub total: usize,
    /// Prompt text.
    pub text: String,
    /// All four answers in stored order (correct answer first). Use
    /// [`QuestionView::shuffled_answers`] for display.
    pub answers: Vec<String>,
    /// Points at stake.
    pub points: u32,
}

impl QuestionView {
    /// Build a view over `record` with the viewer's known question count.
    pub fn new(record: &QuestionRecord, total: usize) -> Self {
        Self {
            question_id: record.id,
            position: record.position,
            total,
            text: record.text.clone(),
            answers: record.answers(),
            points: record.points,
        }
    }

    /// The four answers in a random display order. Purely presentational;
    /// scoring compares against the canonical correct answer regardless of
    /// the order shown.
    pub fn shuffled_answers(&self) -> Vec<String> {
        let mut shuffled = self.answers.clone();
        shuffled.shuffle(&mut rand::rng());
        shuffled
    }
}

/// What a player currently sees, derived from the replicated game phase and
/// the locally observed question set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurrentQuestion {
    /// The quiz has not started, or the live question has not reached this
    /// client yet (players may lag the host pointer, never lead it).
    Waiting,
    /// The live question as known locally.
    Question(QuestionView),
    /// The quiz is over.
    Completed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question_input() -> QuestionInput {
        QuestionInput {
            text: "What is the capital of France?".into(),
            correct_answer: "Paris".into(),
            incorrect_answers: vec!["London".into(), "Berlin".into(), "Madrid".into()],
            points: 100,
        }
    }

    #[test]
    fn valid_question_passes() {
        assert!(question_input().validate().is_ok());
    }

    #[test]
    fn wrong_answer_count_is_rejected() {
        let mut input = question_input();
        input.incorrect_answers.pop();
        assert!(input.validate().is_err());

        input.incorrect_answers.extend(["Rome".into(), "Oslo".into()]);
        assert!(input.validate().is_err());
    }

    #[test]
    fn empty_fields_are_rejected() {
        let mut input = question_input();
        input.text = "   ".into();
        assert!(input.validate().is_err());

        let mut input = question_input();
        input.incorrect_answers[1] = String::new();
        assert!(input.validate().is_err());
    }

    #[test]
    fn too_few_points_are_rejected() {
        let mut input = question_input();
        input.points = 5;
        assert!(input.validate().is_err());
    }

    #[test]
    fn title_length_is_enforced() {
        let input = CreateGameInput {
            title: "ab".into(),
            description: String::new(),
            category: None,
        };
        assert!(input.validate().is_err());

        let input = CreateGameInput {
            title: "Biology 101".into(),
            description: String::new(),
            category: None,
        };
        assert!(input.validate().is_ok());
        assert_eq!(input.category_or_default(), "other");
    }

    #[test]
    fn shuffled_answers_keep_the_same_set() {
        let record = QuestionRecord {
            id: Uuid::new_v4(),
            rev: 0,
            created_seq: 1,
            created_at: std::time::SystemTime::now(),
            game_id: Uuid::new_v4(),
            position: 0,
            text: "q".into(),
            correct_answer: "a".into(),
            incorrect_answers: ["b".into(), "c".into(), "d".into()],
            points: 100,
        };
        let view = QuestionView::new(&record, 1);
        let mut shuffled = view.shuffled_answers();
        shuffled.sort();
        assert_eq!(shuffled, ["a", "b", "c", "d"]);
    }
}
