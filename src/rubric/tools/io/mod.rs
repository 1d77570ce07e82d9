//! Adapters at the declarative boundary: workbooks and JSON documents in,
//! workbooks and JSON documents out.

pub mod json;
pub mod sheet_read;
pub mod sheet_write;

/// Column headers shared by the workbook reader and writer.
pub mod headers {
    pub const CATEGORY: &str = "Category";
    pub const MAX_POINTS: &str = "Max";
    pub const NAME: &str = "Name";
    pub const NEW_NAME: &str = "New Name";
    pub const TIER: &str = "Tier";
    pub const POINTS: &str = "Points";
    pub const CAPTION: &str = "Grader Caption";
    pub const EXPLANATION: &str = "Explanation";
    pub const INSTRUCTIONS: &str = "Instructions";
    pub const TEMPLATE: &str = "Template?";
    pub const INSTANCES: &str = "Instances";
    pub const UPVOTES: &str = "Upvotes";
    pub const UPVOTE_SHARE: &str = "Upvote %";
    pub const DOWNVOTES: &str = "Downvotes";
    pub const DOWNVOTE_SHARE: &str = "Downvote %";

    /// Column order used when writing a rubric worksheet.
    pub const RUBRIC_COLUMNS: [&str; 9] = [
        CATEGORY,
        MAX_POINTS,
        NAME,
        TIER,
        POINTS,
        CAPTION,
        EXPLANATION,
        INSTRUCTIONS,
        TEMPLATE,
    ];

    /// Columns appended when comments carry usage counts.
    pub const USAGE_COLUMNS: [&str; 5] =
        [INSTANCES, UPVOTES, UPVOTE_SHARE, DOWNVOTES, DOWNVOTE_SHARE];
}
