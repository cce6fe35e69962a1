//! 流水线控制器 - 编排层
//!
//! ## 职责
//!
//! 按顺序执行：分类 → 上传 → 枚举 → 并发提取 → 汇总，
//! 每个阶段结束时先落盘产物，再进入下一阶段。
//!
//! ## 核心功能
//!
//! 1. **阶段推进**：`Init → Classified → FilesReady → Enumerated → Extracting → Done`，
//!    提取之前的任何致命错误进入 `Failed`
//! 2. **并发控制**：使用 Semaphore 限制同时提取的题目数量
//! 3. **失败隔离**：单题失败记录在结果中；`continue_on_error = false` 时停止调度新题
//! 4. **协作式取消**：取消信号只阻止调度新题，已经开始的题目正常完成
//! 5. **资源清理**：开启 `auto_cleanup_files` 时，无论成败都会删除远程文件；
//!    上传记录写不进去时，刚上传的文件总是立即删除
//! 6. **用量统计**：分类、枚举按阶段记账，单题用量随结果返回，最后合并进结果

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult, ExtractionError};
use crate::infrastructure::{
    render_for_classification, ContentVerifier, LatexVerifier, LlmExecutor, OpenAiFileStorage,
    PageRenderer, PdftoppmRenderer, RemoteStorage,
};
use crate::models::{
    ArtifactStore, ClassificationResult, DocumentPair, ExamType, ExtractionResult,
    ProcessedDocument, QuestionDescriptor, QuestionList, TokenUsage, UploadedPair, UsageLedger,
};
use crate::orchestrator::aggregator::{
    counts_as_failure, DocumentHeader, ItemReport, ResultAggregator,
};
use crate::safety::TurnGuard;
use crate::services::{
    Classifier, ContentExtractor, FileManager, LlmService, QuestionEnumerator, QuestionLister,
    WarnWriter,
};
use crate::utils::logging::{log_stage, truncate_text};
use crate::workflow::{verification_error, QuestionCtx, QuestionFlow};

const CANCELLED_REASON: &str = "cancelled before scheduling";
const HALTED_REASON: &str = "not scheduled: run halted after an earlier failure";
const STEP_CLASSIFICATION: &str = "classification";
const STEP_ENUMERATION: &str = "enumeration";

/// 流水线用到的全部外部能力
#[derive(Clone)]
pub struct Capabilities {
    pub renderer: Arc<dyn PageRenderer>,
    pub classifier: Arc<dyn Classifier>,
    pub storage: Arc<dyn RemoteStorage>,
    pub lister: Arc<dyn QuestionLister>,
    pub extractor: Arc<dyn ContentExtractor>,
    pub verifier: Arc<dyn ContentVerifier>,
}

impl Capabilities {
    /// 生产环境的能力组合：OpenAI 兼容接口 + pdftoppm + LaTeX
    pub fn openai(config: &Config) -> Self {
        let executor = Arc::new(LlmExecutor::new(config));
        let llm = Arc::new(LlmService::new(executor.clone()));

        Self {
            renderer: Arc::new(PdftoppmRenderer::new(config.render_quality)),
            classifier: llm.clone(),
            storage: Arc::new(OpenAiFileStorage::new(executor.client().clone())),
            lister: llm.clone(),
            extractor: llm,
            verifier: Arc::new(LatexVerifier::new(
                config.latex_compiler(),
                config.attempt_timeout(),
            )),
        }
    }
}

/// 流水线阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Init,
    Classified,
    FilesReady,
    Enumerated,
    Extracting,
    Done,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Init => "初始化",
            PipelineStage::Classified => "已分类",
            PipelineStage::FilesReady => "文件就绪",
            PipelineStage::Enumerated => "已枚举",
            PipelineStage::Extracting => "提取中",
            PipelineStage::Done => "完成",
            PipelineStage::Failed => "失败",
        };
        f.write_str(name)
    }
}

/// 协作式取消信号
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 流水线控制器
pub struct Pipeline {
    config: Config,
    capabilities: Capabilities,
    cancel: CancelSignal,
}

impl Pipeline {
    pub fn new(config: Config, capabilities: Capabilities) -> Self {
        Self {
            config,
            capabilities,
            cancel: CancelSignal::new(),
        }
    }

    /// 取得取消信号（可克隆到其他任务，例如 Ctrl-C 处理）
    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    /// 产物目录：显式指定的目录，或 `config.output_dir/exam_id`
    pub fn artifact_root(&self, exam_id: &str, output_dir: Option<PathBuf>) -> PathBuf {
        output_dir.unwrap_or_else(|| self.config.output_dir.join(exam_id))
    }

    /// 处理一对试卷 / 答案
    ///
    /// # 参数
    /// - `pair`: 本地文档对
    /// - `exam_id`: 试卷ID，缺省为 `exam_{时间戳}`
    /// - `output_dir`: 产物目录，缺省为 `config.output_dir/exam_id`
    pub async fn run(
        &self,
        pair: &DocumentPair,
        exam_id: Option<String>,
        output_dir: Option<PathBuf>,
    ) -> AppResult<ProcessedDocument> {
        let started = Instant::now();
        let exam_id = exam_id.unwrap_or_else(default_exam_id);
        log_stage(&exam_id, PipelineStage::Init);

        // 远程调用之前先确认输入存在
        pair.ensure_exists()?;

        let store = ArtifactStore::create(self.artifact_root(&exam_id, output_dir)).await?;
        info!("[试卷 {}] 📁 产物目录: {}", exam_id, store.root().display());

        let mut usage = UsageLedger::default();
        let classification = match self.classify(pair, &store, &mut usage).await {
            Ok(c) => c,
            Err(e) => return Err(fail(&exam_id, e)),
        };
        log_stage(&exam_id, PipelineStage::Classified);

        let files = FileManager::new(self.capabilities.storage.clone());
        let uploaded = match self.prepare_files(&files, pair, &store).await {
            Ok(u) => u,
            Err(e) => return Err(fail(&exam_id, e)),
        };
        log_stage(&exam_id, PipelineStage::FilesReady);

        let outcome = self
            .process_uploaded(
                &exam_id,
                classification.exam_type,
                pair,
                &uploaded,
                &store,
                usage,
                started,
            )
            .await;

        // 无论成败都清理
        if self.config.auto_cleanup_files {
            let report = files.cleanup(&uploaded.handles()).await;
            if !report.failed.is_empty() {
                warn!("[试卷 {}] ⚠️ 以下远程文件未能删除: {:?}", exam_id, report.failed);
            }
        }

        outcome.map_err(|e| fail(&exam_id, e))
    }

    /// 上传之后的阶段（枚举 → 提取 → 汇总）
    #[allow(clippy::too_many_arguments)]
    async fn process_uploaded(
        &self,
        exam_id: &str,
        exam_type: ExamType,
        pair: &DocumentPair,
        uploaded: &UploadedPair,
        store: &ArtifactStore,
        mut usage: UsageLedger,
        started: Instant,
    ) -> AppResult<ProcessedDocument> {
        let list = self.enumerate(exam_type, uploaded, store, &mut usage).await?;
        log_stage(exam_id, PipelineStage::Enumerated);

        log_stage(exam_id, PipelineStage::Extracting);
        let mut aggregator = ResultAggregator::new(self.config.keep_unverified_drafts);
        let abort = self
            .extract_all(exam_id, &list, uploaded, store, &mut aggregator)
            .await;

        let header = DocumentHeader {
            exam_id: exam_id.to_string(),
            exam_type: list.exam_type,
            documents: pair.clone(),
            uploaded: uploaded.clone(),
            warnings: list.warnings.iter().map(ToString::to_string).collect(),
            model: self.config.llm_model_name.clone(),
            pricing: self.config.pricing(),
            stage_usage: usage,
        };
        let document = aggregator.finish(header, started);
        let result_path = store.save_result(&document).await?;
        info!("[试卷 {}] ✓ 结果已保存: {}", exam_id, result_path.display());

        match abort {
            Some(e) => Err(e),
            None => {
                log_stage(exam_id, PipelineStage::Done);
                Ok(document)
            }
        }
    }

    // ========== 阶段 1: 分类 ==========

    async fn classify(
        &self,
        pair: &DocumentPair,
        store: &ArtifactStore,
        usage: &mut UsageLedger,
    ) -> AppResult<ClassificationResult> {
        if self.config.resume_from_artifacts {
            if let Some(classification) = store.load_classification().await? {
                info!("♻️ 复用已保存的分类结果: {}", classification.exam_type);
                return Ok(classification);
            }
        }

        info!("🔍 正在分类试卷: {}", pair.paper.display());
        let pages = render_for_classification(
            self.capabilities.renderer.as_ref(),
            &pair.paper,
            self.config.classification_sample_pages,
        )
        .await
        .map_err(|e| AppError::capability("render", e))?;

        let mut guard = TurnGuard::scoped("classify", self.config.classifier_max_turns);
        let call_started = Instant::now();
        let classification = self
            .capabilities
            .classifier
            .classify(&pages, &mut guard)
            .await
            .map_err(|e| AppError::capability(STEP_CLASSIFICATION, e))?;
        usage.record(
            STEP_CLASSIFICATION,
            guard.usage(),
            call_started.elapsed(),
            &self.config.pricing(),
        );

        info!(
            "✓ 试卷类型: {} (置信度: {:?}) {}",
            classification.exam_type,
            classification.confidence,
            truncate_text(&classification.reasoning, 80)
        );
        store.save_classification(&classification).await?;
        Ok(classification)
    }

    // ========== 阶段 2: 上传 ==========

    async fn prepare_files(
        &self,
        files: &FileManager,
        pair: &DocumentPair,
        store: &ArtifactStore,
    ) -> AppResult<UploadedPair> {
        if self.config.resume_from_artifacts {
            if let Some(previous) = store.load_uploads().await? {
                if previous.matches(pair)
                    && files.verify(&previous.paper).await
                    && files.verify(&previous.solution).await
                {
                    info!(
                        "♻️ 复用已上传的文件: {} / {}",
                        previous.paper.id, previous.solution.id
                    );
                    return Ok(previous);
                }
                warn!("⚠️ 已保存的远程文件不可用，重新上传");
                files.cleanup(&previous.handles()).await;
            }
        }

        let uploaded = files.upload(pair).await?;
        if let Err(e) = store.save_uploads(&uploaded).await {
            // 句柄没有落盘，之后的运行无法再找回这两个文件
            error!("上传记录写入失败，删除刚上传的远程文件: {}", e);
            let report = files.cleanup(&uploaded.handles()).await;
            if !report.failed.is_empty() {
                warn!("⚠️ 以下远程文件未能删除: {:?}", report.failed);
            }
            return Err(e);
        }
        Ok(uploaded)
    }

    // ========== 阶段 3: 枚举 ==========

    async fn enumerate(
        &self,
        exam_type: ExamType,
        uploaded: &UploadedPair,
        store: &ArtifactStore,
        usage: &mut UsageLedger,
    ) -> AppResult<QuestionList> {
        if self.config.resume_from_artifacts {
            if let Some(list) = store.load_question_list().await? {
                if list.check_invariants().is_ok() {
                    info!("♻️ 复用已保存的题目列表: {} 道题", list.len());
                    return Ok(list);
                }
                warn!("⚠️ 已保存的题目列表不合法，重新枚举");
            }
        }

        let enumerator =
            QuestionEnumerator::new(self.capabilities.lister.clone(), self.config.lister_max_turns);
        let mut tokens = TokenUsage::default();
        let call_started = Instant::now();
        let list = enumerator.enumerate(exam_type, &uploaded.paper, &mut tokens).await?;
        usage.record(
            STEP_ENUMERATION,
            tokens,
            call_started.elapsed(),
            &self.config.pricing(),
        );
        store.save_question_list(&list).await?;
        Ok(list)
    }

    // ========== 阶段 4: 并发提取 ==========

    /// 返回需要上抛的错误（仅 `continue_on_error = false` 时可能出现）
    async fn extract_all(
        &self,
        exam_id: &str,
        list: &QuestionList,
        uploaded: &UploadedPair,
        store: &ArtifactStore,
        aggregator: &mut ResultAggregator,
    ) -> Option<AppError> {
        let total = list.len();
        let halt_on_failure = !self.config.continue_on_error;
        let keep_drafts = self.config.keep_unverified_drafts;

        let flow = Arc::new(QuestionFlow::new(
            &self.config,
            self.capabilities.extractor.clone(),
            self.capabilities.verifier.clone(),
        ));
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_questions.max(1)));
        let shared_files = Arc::new(uploaded.clone());
        // 某题硬失败后停止调度
        let halted = CancelSignal::new();

        info!(
            "[试卷 {}] 📋 开始提取 {} 道题，最大并发数: {}",
            exam_id,
            total,
            self.config.max_concurrent_questions.max(1)
        );

        let mut handles: Vec<(QuestionDescriptor, JoinHandle<Result<ExtractionResult, ExtractionError>>)> =
            Vec::with_capacity(total);
        let mut unscheduled: Vec<(QuestionDescriptor, &'static str)> = Vec::new();

        for (pos, descriptor) in list.descriptors.iter().enumerate() {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("[试卷 {}] 无法获取并发许可: {}", exam_id, e);
                    unscheduled.extend(
                        list.descriptors[pos..].iter().cloned().map(|d| (d, HALTED_REASON)),
                    );
                    break;
                }
            };

            // 拿到许可后再检查一次：等待期间可能已取消或已有题目失败
            let stop_reason = if self.cancel.is_cancelled() {
                Some(CANCELLED_REASON)
            } else if halted.is_cancelled() {
                Some(HALTED_REASON)
            } else {
                None
            };
            if let Some(reason) = stop_reason {
                drop(permit);
                warn!(
                    "[试卷 {}] ⚠️ 停止调度，剩余 {} 道题不再处理",
                    exam_id,
                    total - pos
                );
                unscheduled.extend(list.descriptors[pos..].iter().cloned().map(|d| (d, reason)));
                break;
            }

            let ctx = QuestionCtx::new(exam_id, list.exam_type, descriptor.clone(), total);
            let flow = flow.clone();
            let files = shared_files.clone();
            let halted = halted.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let result = flow.run(&ctx, &files).await;
                let hard_failure = match &result {
                    Ok(r) => verification_error(r).is_some() && !keep_drafts,
                    Err(_) => true,
                };
                if halt_on_failure && hard_failure {
                    warn!("{} ⚠️ 出现失败，停止调度新题", ctx);
                    halted.cancel();
                }
                result
            });
            handles.push((descriptor.clone(), handle));
        }

        // ========== 按序号收集 ==========
        let warn_writer = WarnWriter::with_path(store.warn_file());
        let mut first_failure: Option<AppError> = None;

        for (descriptor, handle) in handles {
            let item = match handle.await {
                Ok(Ok(result)) => {
                    if let Err(e) = store.save_question(&result).await {
                        error!("[试卷 {}] 题目 {} 产物写入失败: {}", exam_id, result.label, e);
                    }
                    if let Some(err) = verification_error(&result).filter(|_| !keep_drafts) {
                        first_failure.get_or_insert_with(|| AppError::Extraction {
                            label: result.label.clone(),
                            source: err,
                        });
                    }
                    ItemReport::Completed(result)
                }
                Ok(Err(e)) => {
                    error!(
                        "[试卷 {}] ❌ 题目 {} 提取失败: {}",
                        exam_id, descriptor.label, e
                    );
                    let reason = e.to_string();
                    first_failure.get_or_insert_with(|| AppError::Extraction {
                        label: descriptor.label.clone(),
                        source: e,
                    });
                    failed_item(&descriptor, reason)
                }
                Err(e) => {
                    error!(
                        "[试卷 {}] 题目 {} 任务执行失败: {}",
                        exam_id, descriptor.label, e
                    );
                    let reason = e.to_string();
                    first_failure.get_or_insert_with(|| AppError::Extraction {
                        label: descriptor.label.clone(),
                        source: ExtractionError::TaskFailed(reason.clone()),
                    });
                    failed_item(&descriptor, reason)
                }
            };

            if let Some(reason) = failure_reason(&item, keep_drafts) {
                record_warning(&warn_writer, exam_id, &item, &reason).await;
            }
            aggregator.push(item);
        }

        for (descriptor, reason) in unscheduled {
            let item = failed_item(&descriptor, reason.to_string());
            record_warning(&warn_writer, exam_id, &item, reason).await;
            aggregator.push(item);
        }

        if halt_on_failure {
            first_failure
        } else {
            None
        }
    }
}

fn default_exam_id() -> String {
    format!("exam_{}", chrono::Utc::now().timestamp())
}

fn failed_item(descriptor: &QuestionDescriptor, reason: String) -> ItemReport {
    ItemReport::Failed {
        index: descriptor.index,
        label: descriptor.label.clone(),
        reason,
    }
}

/// 需要写入 warn.txt 的原因；成功结果返回 `None`
fn failure_reason(item: &ItemReport, keep_drafts: bool) -> Option<String> {
    match item {
        ItemReport::Completed(result) if !counts_as_failure(result, keep_drafts) => None,
        ItemReport::Completed(result) => {
            let verification = &result.verification;
            let detail = match (&verification.budget_note, verification.unresolved()) {
                (Some(note), _) => note.clone(),
                (None, Some((kind, error))) => format!("{kind}: {error}"),
                (None, None) => String::new(),
            };
            Some(format!("{}: {}", result.outcome, detail))
        }
        ItemReport::Failed { reason, .. } => Some(reason.clone()),
    }
}

async fn record_warning(writer: &WarnWriter, exam_id: &str, item: &ItemReport, reason: &str) {
    if let Err(e) = writer.write(exam_id, item.index(), item.label(), reason).await {
        error!("[试卷 {}] 写入 warn.txt 失败: {}", exam_id, e);
    } else {
        warn!(
            "[试卷 {}] ⚠️ 已写入 warn.txt: 题目 {} {}",
            exam_id,
            item.index(),
            item.label()
        );
    }
}

fn fail(exam_id: &str, e: AppError) -> AppError {
    error!("[试卷 {}] ❌ {}", exam_id, e);
    log_stage(exam_id, PipelineStage::Failed);
    e
}
