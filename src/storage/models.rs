/// A stored activity, as read back from the destination.
#[derive(Debug, Clone)]
pub struct Activity {
    pub id: i64,
    pub origin: String,
    pub content: String,
    pub recorded_at: String,
    pub source_ref: Option<String>,
    pub fingerprint: String,
    pub created_at: String,
    pub media_ids: Vec<i64>,
}

/// A downloaded image registered with the destination.
#[derive(Debug, Clone)]
pub struct MediaItem {
    pub id: i64,
    pub source_url: String,
    pub local_path: String,
    pub content_type: Option<String>,
    pub byte_size: i64,
    pub created_at: String,
}
