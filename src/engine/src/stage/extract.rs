//! Per-instruction dependency extraction.

use stagekey_core::error::Result;

use super::backend::InstructionParser;
use super::cancel::Cancellation;
use super::checksum::ContextChecksum;
use super::dockerfile::{Instruction, Step};
use super::scope::{GlobalScope, StageScope};

/// How an instruction's values are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    /// The stage's own instruction: ARG and ENV scope, ARG/ENV bind values.
    Own,
    /// An ONBUILD trigger: stage ENV scope only, nothing is bound.
    Inherited,
}

/// Dependencies contributed by one instruction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub dependencies: Vec<String>,
    /// Contributions of ONBUILD triggers, passed on to child stages
    pub onbuild: Vec<String>,
}

/// Turns instructions into dependency strings.
pub struct Extractor<'a> {
    global: &'a GlobalScope,
    checksum: &'a ContextChecksum,
    parser: &'a dyn InstructionParser,
    cancel: &'a Cancellation,
}

impl<'a> Extractor<'a> {
    pub fn new(
        global: &'a GlobalScope,
        checksum: &'a ContextChecksum,
        parser: &'a dyn InstructionParser,
        cancel: &'a Cancellation,
    ) -> Self {
        Self {
            global,
            checksum,
            parser,
            cancel,
        }
    }

    /// Extract a stage's own instruction.
    pub async fn extract(&self, step: &Step, scope: &mut StageScope) -> Result<Extraction> {
        if let Instruction::Onbuild { trigger } = &step.instruction {
            let trigger_step = self.parser.parse_trigger(trigger)?;
            let onbuild = self
                .extract_simple(&trigger_step, scope, ResolveMode::Inherited)
                .await?;
            return Ok(Extraction {
                dependencies: vec![trigger.clone()],
                onbuild,
            });
        }

        Ok(Extraction {
            dependencies: self.extract_simple(step, scope, ResolveMode::Own).await?,
            onbuild: Vec::new(),
        })
    }

    /// Extract a trigger inherited from a base image.
    pub async fn extract_inherited(&self, trigger: &str, scope: &mut StageScope) -> Result<Vec<String>> {
        let step = self.parser.parse_trigger(trigger)?;
        self.extract_simple(&step, scope, ResolveMode::Inherited).await
    }

    /// Extract any instruction that is neither `FROM` nor `ONBUILD`.
    ///
    /// # Panics
    ///
    /// Panics on `FROM` or `ONBUILD`: the parser never places them here.
    async fn extract_simple(
        &self,
        step: &Step,
        scope: &mut StageScope,
        mode: ResolveMode,
    ) -> Result<Vec<String>> {
        let mut dependencies = Vec::new();

        match &step.instruction {
            Instruction::From { .. } | Instruction::Onbuild { .. } => {
                panic!(
                    "unexpected instruction on line {} in {:?} mode: {}",
                    step.line, mode, step.text
                );
            }
            Instruction::Arg { args } => {
                for decl in args {
                    let (key, value) = match mode {
                        ResolveMode::Own => {
                            scope.add_arg(&decl.name, decl.default.as_deref(), self.global)?
                        }
                        ResolveMode::Inherited => (
                            scope.resolve_inherited(&decl.name)?,
                            scope.resolve_inherited(decl.default.as_deref().unwrap_or(""))?,
                        ),
                    };
                    dependencies.push(format!("ARG {}={}", key, value));
                }
            }
            Instruction::Env { vars } => {
                for (key, value) in vars {
                    let (key, value) = match mode {
                        ResolveMode::Own => scope.add_env(key, value)?,
                        ResolveMode::Inherited => (
                            scope.resolve_inherited(key)?,
                            scope.resolve_inherited(value)?,
                        ),
                    };
                    dependencies.push(format!("ENV {}={}", key, value));
                }
            }
            Instruction::Add { src, .. } => {
                dependencies.push(step.text.clone());
                dependencies.push(self.sources_checksum(src, scope, mode).await?);
            }
            Instruction::Copy { src, from, .. } => {
                dependencies.push(step.text.clone());
                if from.is_none() {
                    dependencies.push(self.sources_checksum(src, scope, mode).await?);
                }
            }
            _ => dependencies.push(resolve_in(scope, mode, &step.text)?),
        }

        Ok(dependencies)
    }

    async fn sources_checksum(
        &self,
        sources: &[String],
        scope: &StageScope,
        mode: ResolveMode,
    ) -> Result<String> {
        let resolved = sources
            .iter()
            .map(|source| resolve_in(scope, mode, source))
            .collect::<Result<Vec<String>>>()?;
        self.checksum.files_checksum(&resolved, self.cancel).await
    }
}

fn resolve_in(scope: &StageScope, mode: ResolveMode, text: &str) -> Result<String> {
    match mode {
        ResolveMode::Own => scope.resolve_own(text),
        ResolveMode::Inherited => scope.resolve_inherited(text),
    }
}
