use crate::models::AnswerSet;

/// Number of questions in the fixed sequence
pub const QUESTION_COUNT: usize = 6;

/// Sentinel stored when the user skips a question
pub const SKIP_ANSWER: &str = "unspecified";

/// The fixed question sequence: (key, prompt)
pub const QUESTIONS: [(&str, &str); QUESTION_COUNT] = [
    (
        "genre",
        "Which movie genres do you prefer?\n(e.g. comedy, sci-fi, drama, action)",
    ),
    (
        "favorite_movies",
        "What are your favorite movies?\n(name 2-3 movies you especially like)",
    ),
    (
        "mood",
        "What mood are you in for watching today?\n(e.g. cheerful, romantic, tense, relaxed)",
    ),
    (
        "duration",
        "How long a movie do you prefer?\n(e.g. short under 90 min, standard 90-120 min, long 120+ min)",
    ),
    (
        "year",
        "Movies from which period interest you?\n(e.g. classics from the 70s-90s, modern 2000+, new releases)",
    ),
    (
        "additional",
        "Any additional wishes?\n(e.g. no horror, something light, good dialogue)",
    ),
];

/// Formats a question prompt with its progress marker, e.g. "(1/6) ..."
pub fn prompt_for(index: usize) -> Option<String> {
    QUESTIONS
        .get(index)
        .map(|(_, text)| format!("({}/{}) {}", index + 1, QUESTION_COUNT, text))
}

/// Per-user cursor through the question sequence
///
/// Owned by the engine for the duration of one run; the accumulated answers
/// are persisted into the session once the sequence is exhausted and the
/// progress is discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionnaireProgress {
    pub session_code: String,
    pub current_index: usize,
    pub answers: AnswerSet,
}

impl QuestionnaireProgress {
    /// Starts a fresh run at question 0
    pub fn new(session_code: impl Into<String>) -> Self {
        Self {
            session_code: session_code.into(),
            current_index: 0,
            answers: AnswerSet::new(),
        }
    }

    /// Records an answer for the current question and advances the cursor
    ///
    /// No-op when the sequence is already exhausted.
    pub fn record(&mut self, answer: impl Into<String>) {
        if let Some((key, _)) = QUESTIONS.get(self.current_index) {
            self.answers.insert((*key).to_string(), answer.into());
            self.current_index += 1;
        }
    }

    /// Records the skip sentinel for the current question and advances
    pub fn skip(&mut self) {
        self.record(SKIP_ANSWER);
    }

    /// True once all questions have been answered or skipped
    pub fn is_complete(&self) -> bool {
        self.current_index >= QUESTION_COUNT
    }
}
