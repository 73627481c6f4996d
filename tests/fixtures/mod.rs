//! Reusable test fixtures

mod answer_recorder;
mod two_peer;

pub use answer_recorder::{AnswerRecorder, Answers};
pub use two_peer::{TwoPeerFixture, WAIT, recv, wait_for};
