//! Prompt templates.
//!
//! Every prompt opens with a `### task:` line naming the agent. Providers
//! ignore it; fakes and log scrapers key on it.

use crate::domain::bundle::CodeBundle;
use crate::domain::response::ChatTurn;
use crate::domain::review::{Review, ReviewerId};

pub const TASK_ROUTE: &str = "### task: route";
pub const TASK_EXPLAIN: &str = "### task: explain";
pub const TASK_GENERATE: &str = "### task: generate";
pub const TASK_TEST: &str = "### task: test";
pub const TASK_CRITIC: &str = "### task: review/critic";
pub const TASK_DEFENDER: &str = "### task: review/defender";
pub const TASK_CONTROLLER: &str = "### task: controller";
pub const TASK_FIX: &str = "### task: fix";
pub const TASK_IMPACT: &str = "### task: impact";
pub const TASK_DECOMPOSE: &str = "### task: decompose";

fn history_block(history: &[ChatTurn]) -> String {
    if history.is_empty() {
        return String::new();
    }
    let mut out = String::from("Conversation so far:\n");
    // Only the most recent turns; older ones rarely change intent.
    for turn in history.iter().rev().take(6).rev() {
        out.push_str(&format!("{}: {}\n", turn.role, turn.content));
    }
    out.push('\n');
    out
}

pub fn route(query: &str, context_hint: &str) -> String {
    format!(
        "{TASK_ROUTE}\n\
         Classify the developer request into one primary action.\n\
         Actions: EXPLAIN (answer a question about existing code), GENERATE (write or modify code), \
         TEST (write tests for existing code), DECOMPOSE (large multi-step task to split up).\n\
         Respond with JSON only:\n\
         {{\"primary_action\": \"EXPLAIN|GENERATE|TEST|DECOMPOSE\", \"secondary_actions\": [], \
         \"parallel_agents\": [], \"confidence\": 0.0-1.0, \"reasoning\": \"...\"}}\n\n\
         Repository hint: {context_hint}\n\
         Request: {query}\n"
    )
}

pub fn explain(query: &str, history: &[ChatTurn], context: &str) -> String {
    format!(
        "{TASK_EXPLAIN}\n\
         Answer the question using only the repository excerpts below. Reference files as \
         path:start-end. If the excerpts do not contain the answer, say so.\n\n\
         {history}Excerpts:\n{context}\n\nQuestion: {query}\n",
        history = history_block(history)
    )
}

pub fn generate(query: &str, history: &[ChatTurn], context: &str) -> String {
    format!(
        "{TASK_GENERATE}\n\
         Implement the request. Ground the code in the repository excerpts and keep their style.\n\
         Respond with JSON only:\n\
         {{\"plan\": \"short plan\", \"files\": [{{\"file_path\": \"...\", \"content\": \"...\"}}]}}\n\n\
         {history}Excerpts:\n{context}\n\nRequest: {query}\n",
        history = history_block(history)
    )
}

pub fn tests_for(request: &str, code: Option<&CodeBundle>) -> String {
    let target = match code {
        Some(bundle) => format!("Code under test:\n{}", bundle.render()),
        None => "The code is being written in parallel; test the behaviour the request describes, \
                 importing from the module names it implies."
            .to_string(),
    };
    format!(
        "{TASK_TEST}\n\
         Write a pytest test file for the request. Output only the file contents, no prose.\n\n\
         Request: {request}\n\n{target}\n"
    )
}

pub fn review(reviewer: ReviewerId, request: &str, code: &CodeBundle, context: &str) -> String {
    let (task, stance) = match reviewer {
        ReviewerId::Critic => (
            TASK_CRITIC,
            "You are a strict reviewer. Find correctness bugs, missed edge cases, security \
             problems and deviations from the request.",
        ),
        ReviewerId::Defender => (
            TASK_DEFENDER,
            "You are the author's advocate. Identify what the code does well and which \
             objections would be nitpicks, but acknowledge real defects.",
        ),
    };
    format!(
        "{task}\n{stance}\n\
         Respond with JSON only:\n\
         {{\"score\": 0-10, \"issues\": [], \"suggestions\": [], \
         \"verdict\": \"APPROVE|NEEDS_CHANGES|REJECT\", \
         \"improved_code\": null or [{{\"file_path\": \"...\", \"content\": \"...\"}}]}}\n\n\
         Request: {request}\n\nContext:\n{context}\n\nCode:\n{code}\n",
        code = code.render()
    )
}

pub fn controller(request: &str, code: &CodeBundle, critic: &Review, defender: &Review) -> String {
    format!(
        "{TASK_CONTROLLER}\n\
         Two reviewers assessed the code below. Produce a revised version that applies every \
         suggestion both would accept. Keep file paths unchanged.\n\
         Respond with JSON only:\n\
         {{\"reasoning\": \"...\", \"final_code\": [{{\"file_path\": \"...\", \"content\": \"...\"}}]}}\n\n\
         Request: {request}\n\n\
         Critic (score {cs}): issues {ci:?}; suggestions {cg:?}\n\
         Defender (score {ds}): issues {di:?}; suggestions {dg:?}\n\n\
         Code:\n{code}\n",
        cs = critic.score,
        ci = critic.issues,
        cg = critic.suggestions,
        ds = defender.score,
        di = defender.issues,
        dg = defender.suggestions,
        code = code.render()
    )
}

pub fn fix(request: &str, code: &CodeBundle, tests: &str, digest: &str) -> String {
    format!(
        "{TASK_FIX}\n\
         The tests below fail against the code. Decide whether the code or the tests are wrong \
         and return a corrected version of exactly one of them.\n\
         Respond with JSON only:\n\
         {{\"target\": \"code|tests\", \"reasoning\": \"...\", \
         \"files\": [{{\"file_path\": \"...\", \"content\": \"...\"}}] (when target is code), \
         \"tests\": \"...\" (when target is tests)}}\n\n\
         Request: {request}\n\nFailures:\n{digest}\n\nCode:\n{code}\n\nTests:\n{tests}\n",
        code = code.render()
    )
}

pub fn impact(changed: &[String], code_changes: &str, references: &str) -> String {
    format!(
        "{TASK_IMPACT}\n\
         Assess the risk of the change. Respond with JSON only:\n\
         {{\"risk_level\": \"LOW|MEDIUM|HIGH|CRITICAL\", \"risks\": [], \"recommendations\": []}}\n\n\
         Changed files: {changed}\n\nChange:\n{code_changes}\n\n\
         Code that references the changed modules:\n{references}\n",
        changed = changed.join(", ")
    )
}

pub fn decompose(query: &str, context: &str) -> String {
    format!(
        "{TASK_DECOMPOSE}\n\
         Break the request into a short ordered list of independent sub-tasks.\n\
         Respond with JSON only: {{\"subtasks\": [\"...\"], \"summary\": \"...\"}}\n\n\
         Repository excerpts:\n{context}\n\nRequest: {query}\n"
    )
}
