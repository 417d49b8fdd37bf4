use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Chunk kinds
// ---------------------------------------------------------------------------

/// Closed enumeration of chunk shapes the chunker can emit.
///
/// The set mirrors declaration forms across the supported language families
/// plus structural kinds for data/prose files and the window fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChunkKind {
    Function,
    Method,
    Initializer,
    Class,
    Struct,
    Enum,
    Protocol,
    Extension,
    Actor,
    Macro,
    Typealias,
    Variable,
    Constant,
    Namespace,
    ObjcInterface,
    ObjcImplementation,
    ObjcMethod,
    ObjcProperty,
    ObjcCategory,
    CFunction,
    CStruct,
    CTypedef,
    CMacro,
    JsonObject,
    JsonArray,
    YamlMapping,
    YamlSequence,
    MarkdownSection,
    MarkdownCodeBlock,
    Comment,
    Section,
    Document,
    File,
    Interface,
    Unknown,
}

impl ChunkKind {
    /// Kinds that denote executable code with a body.
    pub fn is_callable(self) -> bool {
        matches!(
            self,
            Self::Function | Self::Method | Self::Initializer | Self::ObjcMethod | Self::CFunction
        )
    }

    /// Kinds that introduce a named type.
    pub fn is_type_declaration(self) -> bool {
        matches!(
            self,
            Self::Class
                | Self::Struct
                | Self::Enum
                | Self::Protocol
                | Self::Actor
                | Self::Typealias
                | Self::ObjcInterface
                | Self::CStruct
                | Self::CTypedef
                | Self::Interface
        )
    }

    /// Swift-family declaration kinds (also used for other modern OO languages).
    pub fn is_swiftish(self) -> bool {
        matches!(
            self,
            Self::Function
                | Self::Method
                | Self::Initializer
                | Self::Class
                | Self::Struct
                | Self::Enum
                | Self::Protocol
                | Self::Extension
                | Self::Actor
                | Self::Macro
                | Self::Typealias
                | Self::Variable
                | Self::Constant
        )
    }

    pub fn is_objc(self) -> bool {
        matches!(
            self,
            Self::ObjcInterface
                | Self::ObjcImplementation
                | Self::ObjcMethod
                | Self::ObjcProperty
                | Self::ObjcCategory
        )
    }

    pub fn is_c(self) -> bool {
        matches!(
            self,
            Self::CFunction | Self::CStruct | Self::CTypedef | Self::CMacro
        )
    }

    /// Stable lowercase tag used for ids and store rows.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Initializer => "initializer",
            Self::Class => "class",
            Self::Struct => "struct",
            Self::Enum => "enum",
            Self::Protocol => "protocol",
            Self::Extension => "extension",
            Self::Actor => "actor",
            Self::Macro => "macro",
            Self::Typealias => "typealias",
            Self::Variable => "variable",
            Self::Constant => "constant",
            Self::Namespace => "namespace",
            Self::ObjcInterface => "objc_interface",
            Self::ObjcImplementation => "objc_implementation",
            Self::ObjcMethod => "objc_method",
            Self::ObjcProperty => "objc_property",
            Self::ObjcCategory => "objc_category",
            Self::CFunction => "c_function",
            Self::CStruct => "c_struct",
            Self::CTypedef => "c_typedef",
            Self::CMacro => "c_macro",
            Self::JsonObject => "json_object",
            Self::JsonArray => "json_array",
            Self::YamlMapping => "yaml_mapping",
            Self::YamlSequence => "yaml_sequence",
            Self::MarkdownSection => "markdown_section",
            Self::MarkdownCodeBlock => "markdown_code_block",
            Self::Comment => "comment",
            Self::Section => "section",
            Self::Document => "document",
            Self::File => "file",
            Self::Interface => "interface",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_str_tag(tag: &str) -> Self {
        match tag {
            "function" => Self::Function,
            "method" => Self::Method,
            "initializer" => Self::Initializer,
            "class" => Self::Class,
            "struct" => Self::Struct,
            "enum" => Self::Enum,
            "protocol" => Self::Protocol,
            "extension" => Self::Extension,
            "actor" => Self::Actor,
            "macro" => Self::Macro,
            "typealias" => Self::Typealias,
            "variable" => Self::Variable,
            "constant" => Self::Constant,
            "namespace" => Self::Namespace,
            "objc_interface" => Self::ObjcInterface,
            "objc_implementation" => Self::ObjcImplementation,
            "objc_method" => Self::ObjcMethod,
            "objc_property" => Self::ObjcProperty,
            "objc_category" => Self::ObjcCategory,
            "c_function" => Self::CFunction,
            "c_struct" => Self::CStruct,
            "c_typedef" => Self::CTypedef,
            "c_macro" => Self::CMacro,
            "json_object" => Self::JsonObject,
            "json_array" => Self::JsonArray,
            "yaml_mapping" => Self::YamlMapping,
            "yaml_sequence" => Self::YamlSequence,
            "markdown_section" => Self::MarkdownSection,
            "markdown_code_block" => Self::MarkdownCodeBlock,
            "comment" => Self::Comment,
            "section" => Self::Section,
            "document" => Self::Document,
            "file" => Self::File,
            "interface" => Self::Interface,
            _ => Self::Unknown,
        }
    }
}

// ---------------------------------------------------------------------------
// Chunks & snippets
// ---------------------------------------------------------------------------

/// A contiguous region of one source file representing one declaration or
/// cohesive unit. The embedding/retrieval atom of the whole engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeChunk {
    /// Opaque stable identifier, unique across the store.
    pub id: String,
    /// Repository-relative path with '/' separators.
    pub path: String,
    /// Raw source text of the region.
    pub content: String,
    /// Inclusive 1-based line range. `start_line <= end_line` always holds.
    pub start_line: u32,
    pub end_line: u32,
    pub kind: ChunkKind,
    /// Identifiers defined by this chunk, in source order.
    pub symbols: Vec<String>,
    /// Identifiers referenced by this chunk; consumed only by multi-hop expansion.
    pub references: Vec<String>,
    /// xxh3 hex digest of the whole enclosing file at ingestion time.
    pub file_hash: String,
    /// xxh3 hex digest of `content`; the vector-reuse cache key.
    pub content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Display ancestry, e.g. `"README.md > Install > Linux"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breadcrumb: Option<String>,
    pub token_count: u32,
    pub language: String,
    /// Optional third-party annotation (LLM-generated description).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Documentation-only sibling of [`CodeChunk`]: prose sections that get FTS
/// but no vector and no references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoSnippet {
    pub id: String,
    pub path: String,
    pub content: String,
    pub start_line: u32,
    pub end_line: u32,
    /// Heading or synthesized title for display.
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breadcrumb: Option<String>,
    /// Chunk this snippet annotates, when it sits adjacent to one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Proof that a file's contents were fully indexed; drives change detection
/// without re-opening unchanged files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub file_hash: String,
    pub indexed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Search results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk: CodeChunk,
    /// Fused score; non-negative.
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bm25_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_score: Option<f64>,
    /// 1-based rank in the BM25 candidate list, when present there.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bm25_rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_rank: Option<usize>,
    pub is_multi_hop: bool,
    /// 0 for direct matches, >= 1 for hopped results.
    pub hop_depth: u32,
    /// Min-max scaled fused score in [0, 100], two decimals.
    pub relevance_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnippetResult {
    pub snippet: InfoSnippet,
    pub score: f64,
    pub relevance_percent: f64,
}

// ---------------------------------------------------------------------------
// Progress & reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexingPhase {
    Collecting,
    Indexing,
    Saving,
    Completed,
    Failed,
}

/// Point-in-time snapshot of a running indexing job.
/// `files_processed` is monotonic across snapshots of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingProgress {
    pub phase: IndexingPhase,
    pub files_processed: usize,
    pub total_files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    pub chunks_indexed: usize,
    pub snippets_indexed: usize,
    pub errors: usize,
}

impl IndexingProgress {
    pub fn starting(total_files: usize) -> Self {
        Self {
            phase: IndexingPhase::Collecting,
            files_processed: 0,
            total_files,
            current_file: None,
            chunks_indexed: 0,
            snippets_indexed: 0,
            errors: 0,
        }
    }
}

/// Final summary of one pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub files_processed: usize,
    pub files_skipped: usize,
    pub chunks_indexed: usize,
    pub snippets_indexed: usize,
    pub chunks_embedded: usize,
    pub chunks_reused: usize,
    pub errors: usize,
}

/// Store-level counts.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IndexStatistics {
    pub chunk_count: usize,
    pub snippet_count: usize,
    pub file_count: usize,
}

/// Outcome of one per-file re-index transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReindexOutcome {
    pub total_chunks: usize,
    pub embedded_chunks: usize,
    pub reused_chunks: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_predicates_partition_sensibly() {
        assert!(ChunkKind::Function.is_callable());
        assert!(ChunkKind::ObjcMethod.is_callable());
        assert!(!ChunkKind::Struct.is_callable());

        assert!(ChunkKind::Struct.is_type_declaration());
        assert!(ChunkKind::Protocol.is_type_declaration());
        assert!(!ChunkKind::Function.is_type_declaration());

        assert!(ChunkKind::Actor.is_swiftish());
        assert!(ChunkKind::ObjcCategory.is_objc());
        assert!(ChunkKind::CTypedef.is_c());
        assert!(!ChunkKind::CTypedef.is_objc());
    }

    #[test]
    fn kind_tags_round_trip() {
        for kind in [
            ChunkKind::Function,
            ChunkKind::ObjcImplementation,
            ChunkKind::CMacro,
            ChunkKind::YamlSequence,
            ChunkKind::MarkdownCodeBlock,
            ChunkKind::File,
        ] {
            assert_eq!(ChunkKind::from_str_tag(kind.as_str()), kind);
        }
        assert_eq!(ChunkKind::from_str_tag("no_such_kind"), ChunkKind::Unknown);
    }

    #[test]
    fn status_serializes_camel_case_kind() {
        let json = serde_json::to_string(&ChunkKind::ObjcInterface).unwrap();
        assert_eq!(json, "\"objcInterface\"");
    }
}
