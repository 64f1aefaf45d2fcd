//! Cosmetic flavor lines attached to check-ins. Chosen at random, never
//! derived from anything the user typed.

use rand::seq::IndexedRandom;

const SNIPPETS: &[&str] = &[
    "fn main() { ship(); }",
    "cargo build --release",
    "// it works on my machine",
    "git commit -m \"wip\"",
    "while alive { learn(); }",
    "let coffee = brew().await;",
    "assert!(focus > distractions);",
    "TODO: sleep",
    "impl Flow for Afternoon {}",
    "return Ok(progress);",
];

pub fn pick_snippet() -> String {
    SNIPPETS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or("hello, world")
        .to_string()
}
