//! Named pipeline stages, in execution order.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Collection,
    Evaluation,
    Normalization,
    TargetConversion,
    Alignment,
    Extraction,
    Synthesis,
    Validation,
}

impl StageName {
    pub const ALL: [StageName; 8] = [
        StageName::Collection,
        StageName::Evaluation,
        StageName::Normalization,
        StageName::TargetConversion,
        StageName::Alignment,
        StageName::Extraction,
        StageName::Synthesis,
        StageName::Validation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageName::Collection => "collection",
            StageName::Evaluation => "evaluation",
            StageName::Normalization => "normalization",
            StageName::TargetConversion => "target_conversion",
            StageName::Alignment => "alignment",
            StageName::Extraction => "extraction",
            StageName::Synthesis => "synthesis",
            StageName::Validation => "validation",
        }
    }
}
