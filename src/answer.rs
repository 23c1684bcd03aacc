//! Prompt construction and answer generation.
//!
//! The generator is an external collaborator behind the `Generator` trait;
//! the shipped implementation shells out to a llama.cpp `llama-cli` binary
//! with deterministic decoding. Retrieval happens first, and an empty result
//! set short-circuits before the generator is ever invoked.
use std::process::Command;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::info;

use crate::config::LlamaConfig;
use crate::embedder::Embedder;
use crate::index::VectorIndex;
use crate::retrieve::{Retriever, build_context, references};

const GUIDE_SHORT: &str = "You are a factual assistant. Use ONLY the provided context. If the answer is not found, say: 'Not found in context.'\n\n";

const GUIDE_LONG: &str = "You are a factual assistant. Use ONLY the provided context to provide a comprehensive answer. If the answer is not found, say: 'Not found in context.'\n\n";

/// How much the model is asked to elaborate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Direct answers (`ask`).
    Short,
    /// Comprehensive answers (`explain`, interactive mode).
    Long,
}

/// Build the single instruction prompt handed to the generator.
pub fn build_prompt(context: &str, question: &str, verbosity: Verbosity) -> String {
    let guide = match verbosity {
        Verbosity::Short => GUIDE_SHORT,
        Verbosity::Long => GUIDE_LONG,
    };
    format!("{guide}Context:\n{context}\n\nQuestion: {question}\nAnswer:\n")
}

/// Errors from the external generation service.
#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("generation process {status}: {stderr}")]
    Failed {
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// Capability interface over the text generation service.
pub trait Generator {
    fn generate(&self, prompt: &str) -> Result<String, GenerateError>;
}

/// Generator shelling out to a llama.cpp `llama-cli` binary.
pub struct LlamaCliGenerator {
    cfg: LlamaConfig,
}

impl LlamaCliGenerator {
    pub fn new(cfg: LlamaConfig) -> Self {
        Self { cfg }
    }
}

impl Generator for LlamaCliGenerator {
    fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        info!("Invoking {} for generation", self.cfg.cli_path);

        let output = Command::new(&self.cfg.cli_path)
            .arg("-m")
            .arg(&self.cfg.model_path)
            .arg("-c")
            .arg(self.cfg.ctx_size.to_string())
            .arg("-p")
            .arg(prompt)
            .arg("--temp")
            .arg("0.0")
            .arg("--threads")
            .arg(self.cfg.threads.to_string())
            .arg("--threads-batch")
            .arg(self.cfg.threads_batch.to_string())
            .arg("--gpu-layers")
            .arg(self.cfg.gpu_layers.to_string())
            .arg("--no-display-prompt")
            .arg("--simple-io")
            .arg("-st")
            .output()
            .map_err(|source| GenerateError::Launch {
                program: self.cfg.cli_path.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(GenerateError::Failed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// An answer grounded in retrieved context.
#[derive(Debug)]
pub struct Answer {
    pub text: String,
    /// Distinct source files of the supporting chunks, best-ranked first.
    pub references: Vec<String>,
}

impl Answer {
    /// Render the answer with its reference list.
    #[must_use]
    pub fn render(&self) -> String {
        let refs: Vec<String> = self.references.iter().map(|r| format!("- {r}")).collect();
        format!(
            "\n## Answer:\n{}\n\n## References:\n{}\n",
            self.text,
            refs.join("\n")
        )
    }
}

/// Ties retrieval, context assembly, and generation together.
pub struct AnswerEngine<'a, E: Embedder + ?Sized> {
    pub index: &'a dyn VectorIndex,
    pub embedder: &'a E,
    pub generator: &'a dyn Generator,
    pub top_k: usize,
    pub max_context: usize,
}

impl<'a, E: Embedder + ?Sized> AnswerEngine<'a, E> {
    /// Answer `question` from the corpus.
    ///
    /// Returns `Ok(None)` when retrieval produced no hits; the generator is
    /// not invoked in that case.
    pub fn ask(&self, question: &str, verbosity: Verbosity) -> Result<Option<Answer>> {
        let retriever = Retriever::new(self.index, self.embedder);
        let hits = retriever.retrieve(question, self.top_k)?;

        if hits.is_empty() {
            return Ok(None);
        }

        let context = build_context(&hits, self.max_context);
        let prompt = build_prompt(&context, question, verbosity);

        let text = self
            .generator
            .generate(&prompt)
            .context("generation service failed")?;

        Ok(Some(Answer {
            text,
            references: references(&hits),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunk;
    use crate::embedder::mock::MockEmbedder;
    use crate::index::sqlite::SqliteIndex;
    use std::cell::RefCell;

    const DIMS: usize = 384;

    /// Records prompts instead of running a model.
    struct RecordingGenerator {
        prompts: RefCell<Vec<String>>,
        reply: String,
    }

    impl RecordingGenerator {
        fn new(reply: &str) -> Self {
            Self {
                prompts: RefCell::new(Vec::new()),
                reply: reply.to_string(),
            }
        }
    }

    impl Generator for RecordingGenerator {
        fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
            self.prompts.borrow_mut().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    #[test]
    fn test_build_prompt_short_vs_long() {
        let short = build_prompt("ctx", "q", Verbosity::Short);
        let long = build_prompt("ctx", "q", Verbosity::Long);

        assert!(short.contains("Use ONLY the provided context."));
        assert!(long.contains("comprehensive answer"));
        assert_ne!(short, long);

        for prompt in [&short, &long] {
            assert!(prompt.contains("Context:\nctx"));
            assert!(prompt.contains("Question: q"));
            assert!(prompt.ends_with("Answer:\n"));
            assert!(prompt.contains("Not found in context."));
        }
    }

    #[test]
    fn test_ask_no_results_skips_generator() {
        let embedder = MockEmbedder::new(DIMS);
        let index = SqliteIndex::open_in_memory(DIMS).unwrap();
        let generator = RecordingGenerator::new("should never appear");

        let engine = AnswerEngine {
            index: &index,
            embedder: &embedder,
            generator: &generator,
            top_k: 5,
            max_context: 8000,
        };

        let answer = engine.ask("anything at all", Verbosity::Short).unwrap();
        assert!(answer.is_none());
        assert!(generator.prompts.borrow().is_empty());
    }

    #[test]
    fn test_ask_grounds_prompt_in_retrieved_chunks() {
        let embedder = MockEmbedder::new(DIMS);
        let mut index = SqliteIndex::open_in_memory(DIMS).unwrap();
        let text = "FleetFix is defined as a maintenance scheduler.";
        index
            .replace_file(
                "defs.md",
                1.0,
                &[Chunk {
                    position: 0,
                    content: text.to_string(),
                }],
                &[embedder.embed(text).unwrap()],
            )
            .unwrap();

        let generator = RecordingGenerator::new("A maintenance scheduler.");
        let engine = AnswerEngine {
            index: &index,
            embedder: &embedder,
            generator: &generator,
            top_k: 5,
            max_context: 8000,
        };

        let answer = engine
            .ask("What is FleetFix?", Verbosity::Long)
            .unwrap()
            .expect("expected an answer");

        assert_eq!(answer.text, "A maintenance scheduler.");
        assert_eq!(answer.references, vec!["defs.md"]);

        let prompts = generator.prompts.borrow();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("maintenance scheduler"));
        assert!(prompts[0].contains("What is FleetFix?"));
    }

    #[test]
    fn test_answer_render() {
        let answer = Answer {
            text: "Short answer.".to_string(),
            references: vec!["a.md".to_string(), "b.md".to_string()],
        };
        let rendered = answer.render();
        assert!(rendered.contains("## Answer:\nShort answer."));
        assert!(rendered.contains("## References:\n- a.md\n- b.md"));
    }

    #[test]
    fn test_llama_cli_unreachable_binary() {
        let cfg = LlamaConfig {
            cli_path: "/nonexistent/llama-cli".to_string(),
            ..LlamaConfig::default()
        };
        let generator = LlamaCliGenerator::new(cfg);

        let err = generator.generate("prompt").unwrap_err();
        assert!(matches!(err, GenerateError::Launch { .. }));
    }

    #[test]
    fn test_llama_cli_nonzero_exit_reports_stderr() {
        // `false` exits 1 without output; the error must carry the status
        let cfg = LlamaConfig {
            cli_path: "false".to_string(),
            ..LlamaConfig::default()
        };
        let generator = LlamaCliGenerator::new(cfg);

        match generator.generate("prompt") {
            Err(GenerateError::Failed { status, .. }) => assert!(!status.success()),
            other => panic!("expected Failed, got {other:?}"),
        }
    }
}
