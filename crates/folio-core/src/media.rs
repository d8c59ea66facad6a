//! Media type tables
//!
//! Documents (anything that needs a structural parse before it can be
//! previewed) are told apart from plain assets here, and legacy font
//! types are mapped to the one type browsers accept without a warning.

/// Media type every parsed document is served as.
pub const XHTML_MIME: &str = "application/xhtml+xml";

/// Media type for names that have no declared type.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Media types that go through the parse pipeline.
pub const DOCUMENT_TYPES: &[&str] = &[
    XHTML_MIME,
    "text/html",
    "text/x-oeb1-document",
    "text/x-oeb-document",
];

/// Declared media type -> canonical media type for asset replies.
const ASSET_ALIASES: &[(&str, &str)] = &[
    ("application/vnd.ms-opentype", "application/x-font-ttf"),
    ("application/x-font-truetype", "application/x-font-ttf"),
    ("application/font-sfnt", "application/x-font-ttf"),
];

/// File extension -> media type, used by containers that have no manifest.
const EXTENSIONS: &[(&str, &str)] = &[
    ("xhtml", XHTML_MIME),
    ("xht", XHTML_MIME),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("js", "application/javascript"),
    ("svg", "image/svg+xml"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("ttf", "application/x-font-truetype"),
    ("otf", "application/vnd.ms-opentype"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("ncx", "application/x-dtbncx+xml"),
    ("opf", "application/oebps-package+xml"),
    ("xml", "application/xml"),
    ("txt", "text/plain"),
];

/// Whether resources of this type need a structural parse before display.
pub fn is_document(media_type: &str) -> bool {
    DOCUMENT_TYPES.contains(&media_type)
}

/// Canonical type for an asset reply.
pub fn canonical_asset_type(media_type: &str) -> &str {
    ASSET_ALIASES
        .iter()
        .find(|(declared, _)| *declared == media_type)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(media_type)
}

/// Guess a media type from a document name's extension.
pub fn guess_from_name(name: &str) -> Option<&'static str> {
    let (_, ext) = name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    EXTENSIONS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, media_type)| *media_type)
}

/// Whether the raw data for this type should be handed out as text.
pub fn is_text(media_type: &str) -> bool {
    is_document(media_type)
        || media_type.starts_with("text/")
        || media_type.ends_with("+xml")
        || media_type == "application/xml"
        || media_type == "application/javascript"
}
