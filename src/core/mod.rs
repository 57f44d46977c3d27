pub mod library;
pub mod matcher;
pub mod parser;
pub mod process;
pub mod renamer;
pub mod retry;
pub mod runner;
pub mod scanner;
pub mod tagger;
pub mod transcoder;

#[cfg(test)]
pub(crate) mod fakes;
