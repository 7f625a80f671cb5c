//! Generate-test-repair loop vocabulary.

use serde::{Deserialize, Serialize};

use super::bundle::CodeBundle;

/// States of the refinement state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefinementState {
    GenerateCode,
    GenerateTests,
    RunTests,
    AnalyzeAndFix,
    Done,
    Failed,
}

/// Which artifact the repair step decided was wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixTarget {
    Code,
    Tests,
}

/// What produced the code/tests an iteration ran with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationAction {
    /// First iteration: fresh code and fresh tests.
    InitialGeneration,
    /// Code rewritten, tests carried forward.
    FixedCode,
    /// Tests rewritten, code carried forward.
    FixedTests,
    /// The repair call produced nothing usable; both carried forward.
    NoFixAvailable,
}

/// One append-only entry in the refinement log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinementIteration {
    /// 1-based.
    pub index: u32,
    pub code: CodeBundle,
    pub tests: String,
    pub test_output: String,
    pub passed: bool,
    pub failures: Vec<String>,
    pub action_taken: IterationAction,
}

/// Final report of a refinement run.
///
/// `success` is true exactly when the last logged iteration passed. On
/// exhaustion the last attempted code and tests are still returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinementResult {
    pub success: bool,
    pub total_iterations: u32,
    pub final_code: CodeBundle,
    pub final_tests: String,
    pub iteration_log: Vec<RefinementIteration>,
}

impl RefinementResult {
    pub fn from_log(iteration_log: Vec<RefinementIteration>) -> Self {
        let (success, final_code, final_tests) = match iteration_log.last() {
            Some(last) => (last.passed, last.code.clone(), last.tests.clone()),
            None => (false, CodeBundle::default(), String::new()),
        };
        Self {
            success,
            total_iterations: iteration_log.len() as u32,
            final_code,
            final_tests,
            iteration_log,
        }
    }
}
