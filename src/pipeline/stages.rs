use super::{
    BuildError, BuildOutcome, BuildReport, BuildRun, DecisionProvider, Question, STAGES, StageResult,
};
use crate::models::{BuildRequest, BuildStage, BuilderSettings, ProgressState, STOCK_GAME_ID};
use crate::services::asset_merge::{self, AssetMerger, MergeMode};
use crate::services::code_table::{self, PatchOutcome, PatchRuleSet};
use crate::services::paths::join_relative;
use crate::services::tool::{self, CodeLoad, ToolCommand, ToolRunner};
use crate::services::{AssetManifest, Completion, DeletionList, ProgressReporter, ReporterTiming};
use crate::state::StateManager;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::fs;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

fn io_error(action: &'static str, path: &Utf8Path) -> impl FnOnce(std::io::Error) -> BuildError {
    let path = path.to_path_buf();
    move |source| BuildError::Io {
        action,
        path,
        source,
    }
}

/// Uppercase hex of the ASCII bytes of `text` (`PM` -> `504D`)
fn ascii_hex(text: &str) -> String {
    text.bytes().map(|b| format!("{:02X}", b)).collect()
}

impl BuildRun {
    pub(crate) fn new(
        request: BuildRequest,
        settings: Arc<BuilderSettings>,
        decisions: Arc<dyn DecisionProvider>,
        state: StateManager,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let mut runner = ToolRunner::new(settings.tool_path.as_str())
            .show_window(request.show_tool_window);
        if let Some(launcher) = &settings.tool_launcher {
            runner = runner.via(launcher.as_str());
        }

        Self {
            tree: Utf8PathBuf::from(&settings.working_dir),
            timing: ReporterTiming::from(settings.as_ref()),
            report: BuildReport::default(),
            request,
            settings,
            decisions,
            state,
            progress: Arc::new(ProgressState::new()),
            cancel,
            runner,
            tree_owned: false,
            code_table: None,
            code_table_patched: false,
            mods_skipped: false,
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    fn files_root(&self) -> Utf8PathBuf {
        self.tree.join("files")
    }

    fn warn(&mut self, message: String) {
        tracing::warn!("{}", message);
        self.state.add_warning(message.clone());
        self.report.warnings.push(message);
    }

    /// Ask the decision provider on a blocking thread
    async fn ask(&self, question: Question) -> Result<bool, BuildError> {
        tracing::info!("Asking: {}", question);
        let decisions = Arc::clone(&self.decisions);
        let answer = tokio::task::spawn_blocking(move || decisions.confirm(&question)).await?;
        tracing::info!("Answer: {}", if answer { "yes" } else { "no" });
        Ok(answer)
    }

    /// Continue on yes, cancel on no
    async fn continue_if(&self, question: Question) -> Result<StageResult, BuildError> {
        if self.ask(question).await? {
            Ok(StageResult::Continue)
        } else {
            Ok(StageResult::Cancel)
        }
    }

    pub(crate) async fn execute(mut self) -> BuildOutcome {
        let start = Instant::now();
        self.state.start_build();
        tracing::info!("Build started: {:?}", self.request);

        let mut stopped = None;

        for stage in STAGES {
            if self.is_cancelled() {
                stopped = Some(BuildOutcome::Cancelled { stage });
                break;
            }
            if !self.stage_applies(stage) {
                tracing::debug!("Skipping stage: {}", stage);
                continue;
            }

            tracing::info!("Entering stage: {}", stage);
            self.state.enter_stage(stage);
            self.progress.set_status(stage.status_text());

            let reporter = self.reports_progress(stage).then(|| {
                ProgressReporter::start(
                    Arc::clone(&self.progress),
                    Arc::new(self.state.clone()),
                    self.timing,
                )
            });

            let result = self.run_stage(stage).await;

            if let Some(reporter) = reporter {
                reporter.stop().await;
            }

            match result {
                StageResult::Continue => {}
                StageResult::Cancel => {
                    stopped = Some(BuildOutcome::Cancelled { stage });
                    break;
                }
                StageResult::Fail(error) => {
                    tracing::error!("Stage {} failed: {}", stage, error);
                    stopped = Some(BuildOutcome::Failed { stage, error });
                    break;
                }
            }
        }

        if stopped.is_some() {
            self.rollback();
        }
        self.remove_temp_code_table();

        let outcome = stopped.unwrap_or_else(|| {
            self.report.output = self.request.output.clone();
            BuildOutcome::Completed(std::mem::take(&mut self.report))
        });

        tracing::info!(
            "{} ({:.2}s)",
            outcome.summary(),
            start.elapsed().as_secs_f32()
        );
        self.state.finish_build(outcome.summary());
        outcome
    }

    fn stage_applies(&self, stage: BuildStage) -> bool {
        match stage {
            BuildStage::CodeTable => self.request.code_table.is_some(),
            BuildStage::RemoveContent => self.request.remove_base_content,
            BuildStage::Merge => self.request.mod_root.is_some(),
            BuildStage::Pad => {
                self.request.mod_root.is_some() && !self.mods_skipped && self.code_table_patched
            }
            BuildStage::Banner => self.request.banner.is_some(),
            BuildStage::PatchExecutable => {
                self.request.needs_executable_patch() || !self.settings.extra_dol_patches.is_empty()
            }
            _ => true,
        }
    }

    fn reports_progress(&self, stage: BuildStage) -> bool {
        match stage {
            BuildStage::Extract | BuildStage::Repackage => !self.runner.shows_window(),
            BuildStage::Merge | BuildStage::Pad => true,
            _ => false,
        }
    }

    async fn run_stage(&mut self, stage: BuildStage) -> StageResult {
        let result = match stage {
            BuildStage::Preflight => self.preflight().await,
            BuildStage::CodeTable => self.analyze_code_table().await,
            BuildStage::Extract => self.extract().await,
            BuildStage::Verify => self.verify().await,
            BuildStage::RemoveContent => self.remove_content().await,
            BuildStage::Merge => self.merge().await,
            BuildStage::Pad => self.pad().await,
            BuildStage::Banner => self.apply_banner().await,
            BuildStage::PatchExecutable => self.patch_executable().await,
            BuildStage::Repackage => self.repackage().await,
            BuildStage::Cleanup => Ok(self.cleanup()),
        };
        result.into()
    }

    async fn preflight(&mut self) -> Result<StageResult, BuildError> {
        self.runner.ensure_available()?;

        let name = self
            .runner
            .program()
            .file_stem()
            .unwrap_or(tool::TOOL_PROCESS_NAME)
            .to_string();

        let lookup = name.clone();
        let count = tokio::task::spawn_blocking(move || tool::running_instances(&lookup)).await?;
        if count == 0 {
            return Ok(StageResult::Continue);
        }

        if self.ask(Question::TerminateStrayTools { count }).await? {
            tokio::task::spawn_blocking(move || tool::terminate_instances(&name)).await??;
            tracing::info!("Terminated {} stray tool process(es)", count);
            return Ok(StageResult::Continue);
        }

        if !self.ask(Question::ContinueWithStrayTools { count }).await? {
            return Ok(StageResult::Cancel);
        }
        self.warn(format!("Continuing with {} other tool instance(s) running", count));

        Ok(StageResult::Continue)
    }

    async fn analyze_code_table(&mut self) -> Result<StageResult, BuildError> {
        let Some(gct) = self.request.code_table.clone() else {
            return Ok(StageResult::Continue);
        };
        if !gct.is_file() {
            return Err(BuildError::CodeTableMissing(gct));
        }
        self.code_table = Some(gct.clone());

        let rules_path = Utf8PathBuf::from(&self.settings.patch_rules);
        let rules = match fs::read_to_string(&rules_path) {
            Ok(text) => PatchRuleSet::parse(&text).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        let rules = match rules {
            Ok(rules) => rules,
            Err(reason) => {
                tracing::warn!("Patch rules unavailable: {}", reason);
                return self
                    .continue_if(Question::RulesUnavailable {
                        path: rules_path,
                        reason,
                    })
                    .await;
            }
        };

        if !rules.is_balanced() {
            return self
                .continue_if(Question::UnbalancedRules {
                    patches: rules.patch.len(),
                    replacements: rules.to.len(),
                })
                .await;
        }

        let buffer = fs::read(&gct).map_err(io_error("Failed to read", &gct))?;
        let apply_fixes = rules.guard_matches(&buffer) && self.ask(Question::ApplyCodeFixes).await?;

        match code_table::apply(&rules, &buffer, || apply_fixes)? {
            PatchOutcome::NotNeeded => tracing::info!("Code table needs no fixes"),
            PatchOutcome::Declined => tracing::info!("Keeping code table unpatched"),
            PatchOutcome::Applied { buffer, tally } => {
                let temp = Utf8PathBuf::from(&self.settings.temp_gct);
                if let Some(parent) = temp.parent().filter(|p| !p.as_str().is_empty()) {
                    fs::create_dir_all(parent).map_err(io_error("Failed to create", parent))?;
                }
                fs::write(&temp, &buffer).map_err(io_error("Failed to write", &temp))?;
                tracing::info!("Patched code table written to {} ({})", temp, tally.summary());

                if !tally.is_complete() {
                    self.warn(format!(
                        "There were issues fixing known problem codes: {}",
                        tally.summary()
                    ));
                }

                self.code_table = Some(temp);
                self.code_table_patched = true;
                self.report.patch_tally = Some(tally);
            }
        }

        Ok(StageResult::Continue)
    }

    /// Run `command`, capturing progress unless the tool window is shown
    async fn run_tool(&mut self, command: &ToolCommand) -> Result<Completion<()>, BuildError> {
        if self.runner.shows_window() {
            self.runner.run(command).await?;
            return Ok(Completion::Done(()));
        }
        Ok(self
            .runner
            .run_with_progress(command, &self.progress, &mut self.cancel)
            .await?)
    }

    async fn extract(&mut self) -> Result<StageResult, BuildError> {
        let tree = self.tree.clone();

        if tree.is_dir() {
            let reuse = match &self.request.source_image {
                None => true,
                Some(_) => {
                    self.ask(Question::ReuseWorkingTree { path: tree.clone() })
                        .await?
                }
            };

            if reuse {
                tracing::info!("Reusing existing working tree {}", tree);
                self.tree_owned = true;
                return Ok(StageResult::Continue);
            }

            tracing::info!("Deleting existing working tree {}", tree);
            if let Err(e) = fs::remove_dir_all(&tree) {
                self.warn(format!("Unable to delete {}: {}", tree, e));
            }
            if self.is_cancelled() {
                return Ok(StageResult::Cancel);
            }
        }

        let Some(source) = self.request.source_image.clone() else {
            return Err(BuildError::NoSource(tree));
        };

        self.tree_owned = true;
        let command = ToolCommand::extract(&source, &tree);
        if let Completion::Cancelled = self.run_tool(&command).await? {
            return Ok(StageResult::Cancel);
        }

        if !tree.is_dir() {
            return Err(BuildError::ExtractionFailed(tree));
        }

        Ok(StageResult::Continue)
    }

    async fn verify(&mut self) -> Result<StageResult, BuildError> {
        let manifest_path = Utf8PathBuf::from(&self.settings.file_manifest);

        let manifest = match fs::read_to_string(&manifest_path) {
            Ok(text) => AssetManifest::parse(&text).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        let manifest = match manifest {
            Ok(manifest) => manifest,
            Err(reason) => {
                return self
                    .continue_if(Question::ManifestUnavailable {
                        path: manifest_path,
                        reason,
                    })
                    .await;
            }
        };

        let root = self.tree.clone();
        let issues = tokio::task::spawn_blocking(move || manifest.verify(&root)).await?;

        if issues.is_empty() {
            tracing::info!("Working tree verified");
            return Ok(StageResult::Continue);
        }

        for issue in issues.iter().take(10) {
            tracing::warn!(
                "{}: expected {} bytes, found {}",
                issue.path,
                issue.expected,
                issue
                    .actual
                    .map(|size| format!("{} bytes", size))
                    .unwrap_or_else(|| "nothing".to_string())
            );
        }

        self.continue_if(Question::VerificationFailed {
            mismatches: issues.len(),
        })
        .await
    }

    async fn remove_content(&mut self) -> Result<StageResult, BuildError> {
        let list_path = Utf8PathBuf::from(&self.settings.deletion_list);

        let text = match fs::read_to_string(&list_path) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Deletion list unavailable: {}", e);
                return self
                    .continue_if(Question::DeletionListMissing { path: list_path })
                    .await;
            }
        };

        let list = DeletionList::parse(&text);
        let files_root = self.files_root();
        self.report.deleted =
            tokio::task::spawn_blocking(move || list.apply(&files_root)).await??;

        Ok(StageResult::Continue)
    }

    async fn merge(&mut self) -> Result<StageResult, BuildError> {
        let Some(mod_root) = self.request.mod_root.clone() else {
            return Ok(StageResult::Continue);
        };
        if !mod_root.is_dir() {
            if !self.ask(Question::ModFolderMissing { path: mod_root.clone() }).await? {
                return Ok(StageResult::Cancel);
            }
            self.mods_skipped = true;
            self.warn(format!("Mod folder {} not found, no mod files copied", mod_root));
            return Ok(StageResult::Continue);
        }

        let mode = if self.code_table_patched {
            MergeMode::StripLocaleSuffix
        } else {
            MergeMode::NormalizeLocaleSuffix
        };
        let merger = AssetMerger::new(self.files_root(), &self.settings.locale_marker, mode);
        let progress = Arc::clone(&self.progress);
        let cancel = self.cancel.clone();

        let completion = tokio::task::spawn_blocking(move || {
            let sources = asset_merge::collect_source_files(&mod_root)?;
            merger.merge(&mod_root, &sources, &progress, || *cancel.borrow())
        })
        .await??;

        let summary = match completion {
            Completion::Done(summary) => summary,
            Completion::Cancelled => return Ok(StageResult::Cancel),
        };

        self.report.merged = summary.copied;
        for skipped in &summary.skipped {
            self.warn(format!(
                "Skipped {}: files must be inside an asset category folder",
                skipped
            ));
        }

        Ok(StageResult::Continue)
    }

    async fn pad(&mut self) -> Result<StageResult, BuildError> {
        let files_root = self.files_root();

        for dir in self.settings.padding_dirs.clone() {
            let dir = join_relative(&files_root, &dir);
            let progress = Arc::clone(&self.progress);
            let cancel = self.cancel.clone();

            let completion = tokio::task::spawn_blocking(move || {
                asset_merge::pad_variants(&dir, &progress, || *cancel.borrow())
            })
            .await??;

            match completion {
                Completion::Done(summary) => self.report.padded += summary.padded,
                Completion::Cancelled => return Ok(StageResult::Cancel),
            }
        }

        Ok(StageResult::Continue)
    }

    async fn apply_banner(&mut self) -> Result<StageResult, BuildError> {
        let Some(banner) = self.request.banner.clone() else {
            return Ok(StageResult::Continue);
        };

        if !banner.is_file() {
            return self.continue_if(Question::BannerMissing { path: banner }).await;
        }

        let destination = self.files_root().join("opening.bnr");
        fs::copy(&banner, &destination).map_err(io_error("Failed to copy banner to", &destination))?;
        tracing::info!("Banner {} copied to {}", banner, destination);

        Ok(StageResult::Continue)
    }

    /// Address patches for the executable: game id bytes, then configured extras
    fn address_patches(&self) -> IndexMap<String, String> {
        let mut patches = IndexMap::new();

        // Only the parts that differ from the stock id are patched
        if let Some(id) = &self.request.game_id {
            let (stock_code, stock_variant) = STOCK_GAME_ID.split_at(4);
            if id.code() != stock_code {
                patches.insert(self.settings.id_code_address.clone(), ascii_hex(id.code()));
            }
            if id.variant() != stock_variant {
                patches.insert(
                    self.settings.id_variant_address.clone(),
                    ascii_hex(id.variant()),
                );
            }
        }

        for (address, bytes) in &self.settings.extra_dol_patches {
            patches.insert(address.clone(), bytes.clone());
        }

        patches
    }

    async fn patch_executable(&mut self) -> Result<StageResult, BuildError> {
        let code_load = match &self.code_table {
            Some(gct) => {
                let gct_size = fs::metadata(gct)
                    .map_err(|_| BuildError::CodeTableMissing(gct.clone()))?
                    .len();
                Some(CodeLoad {
                    loader_address: self.settings.loader_address.clone(),
                    handler_size: self.settings.handler_size.clone(),
                    codehandler: Utf8PathBuf::from(&self.settings.codehandler),
                    patch_xml: Utf8PathBuf::from(&self.settings.patch_xml),
                    offset: self.request.code_offset,
                    gct: gct.clone(),
                    gct_size,
                })
            }
            None => None,
        };

        let patches = self.address_patches();
        if code_load.is_none() && patches.is_empty() {
            tracing::info!("Executable needs no patching");
            return Ok(StageResult::Continue);
        }

        let dol = self.tree.join("sys").join("main.dol");
        let command = ToolCommand::dolpatch(&dol, code_load.as_ref(), &patches);
        self.runner.run(&command).await?;

        Ok(StageResult::Continue)
    }

    async fn repackage(&mut self) -> Result<StageResult, BuildError> {
        let output = self.request.output.clone();
        let command = ToolCommand::copy(
            &self.tree,
            &output,
            self.request.split_output,
            self.request.game_id.as_ref(),
            self.request.title.as_deref(),
        );

        if let Completion::Cancelled = self.run_tool(&command).await? {
            return Ok(StageResult::Cancel);
        }

        if !output.exists() {
            return Err(BuildError::OutputMissing(output));
        }

        Ok(StageResult::Continue)
    }

    fn cleanup(&mut self) -> StageResult {
        self.delete_tree();
        StageResult::Continue
    }

    fn delete_tree(&mut self) {
        if !self.tree_owned {
            return;
        }
        self.tree_owned = false;

        if self.tree.exists() {
            match fs::remove_dir_all(&self.tree) {
                Ok(()) => tracing::info!("Deleted working tree {}", self.tree),
                Err(e) => {
                    let message = format!("Unable to delete {} directory: {}", self.tree, e);
                    self.warn(message);
                }
            }
        }
    }

    /// Undo partial work after a cancel or failure.
    ///
    /// The reporter has already been stopped and any tool process reaped by
    /// the time this runs.
    fn rollback(&mut self) {
        tracing::info!("Rolling back build");
        self.delete_tree();
    }

    fn remove_temp_code_table(&mut self) {
        let temp = Utf8PathBuf::from(&self.settings.temp_gct);
        if temp.exists() {
            if let Err(e) = fs::remove_file(&temp) {
                self.warn(format!("Unable to delete {}: {}", temp, e));
            }
        }
    }
}
