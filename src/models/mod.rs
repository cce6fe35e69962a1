pub mod document;
pub mod exam;
pub mod loaders;
pub mod question;
pub mod usage;

pub use document::ProcessedDocument;
pub use exam::{ClassificationResult, DocumentPair, ExamType, RemoteFileHandle, UploadedPair};
pub use loaders::ArtifactStore;
pub use question::{
    safe_label, ContentKind, EnumerationWarning, ExtractionOutcome, ExtractionResult,
    ImageAnnotation, QuestionDescriptor, QuestionList, VerificationSummary,
};
pub use usage::{Pricing, StepUsage, TokenUsage, UsageLedger, UsageReport};
