use bucketview_core::ObjectEntry;
use serde::{Deserialize, Serialize};

use crate::sync::paths::{
    ROOT, date_token_unix, file_url, get_file_info, object_key, split_path, url_under,
};
use crate::sync::tree::FolderTree;

/// Where public links for a bucket point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlBase {
    pub endpoint: String,
    pub bucket: String,
    /// Overrides `endpoint/bucket` when objects are served from elsewhere.
    pub public_base: Option<String>,
}

impl UrlBase {
    pub fn new(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            bucket: bucket.into(),
            public_base: None,
        }
    }

    pub fn url_for(&self, key: &str) -> String {
        match self.public_base.as_deref() {
            Some(base) if !base.is_empty() => url_under(base, key),
            _ => file_url(&self.endpoint, &self.bucket, key),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub data: ObjectEntry,
    pub url: String,
    pub filename: String,
    pub filename_minus_date: String,
    pub name: String,
    pub date: String,
    pub extension: String,
    pub folder: String,
    pub ancestors: Vec<String>,
}

impl FileRecord {
    pub fn from_object(data: ObjectEntry, urls: &UrlBase) -> Self {
        let info = get_file_info(&data.key);
        Self {
            url: urls.url_for(&data.key),
            ancestors: split_path(&info.folder),
            filename: info.filename,
            filename_minus_date: info.filename_minus_date,
            name: info.name,
            date: info.date,
            extension: info.extension,
            folder: info.folder,
            data,
        }
    }

    pub fn key(&self) -> String {
        object_key(&self.folder, &self.filename)
    }

    pub fn is_folder_marker(&self) -> bool {
        self.filename.is_empty()
    }

    /// Points the record at `folder`, keeping its filename.
    pub fn relocate(&mut self, folder: &str, urls: &UrlBase) {
        self.folder = folder.to_string();
        self.ancestors = split_path(folder);
        self.data.key = object_key(folder, &self.filename);
        self.url = urls.url_for(&self.data.key);
    }

    /// Unix seconds used for ordering: the embedded date token when present,
    /// otherwise the listing timestamp.
    pub fn timestamp(&self) -> Option<i64> {
        date_token_unix(&self.date).or_else(|| self.data.last_modified_unix())
    }

    /// Whether the file sits in `folder` or anywhere below it.
    pub fn is_within(&self, folder: &str) -> bool {
        folder == ROOT
            || self.folder == folder
            || self
                .folder
                .strip_prefix(folder)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

pub fn files_equal(a: &FileRecord, b: &FileRecord) -> bool {
    a.folder == b.folder && a.filename == b.filename
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub files: Vec<FileRecord>,
    pub tree: FolderTree,
}

/// Turns a flat object listing into file records and the folder tree they
/// imply. Every key's folder chain is folded into one tree in place.
pub fn build_listing(objects: Vec<ObjectEntry>, urls: &UrlBase) -> Listing {
    let mut tree = FolderTree::default();
    let mut files = Vec::with_capacity(objects.len());
    for object in objects {
        let record = FileRecord::from_object(object, urls);
        tree.insert_path(&record.ancestors);
        if !record.is_folder_marker() {
            files.push(record);
        }
    }
    Listing { files, tree }
}

/// Files directly inside `folder`, oldest first. Undated files sort ahead.
pub fn files_in<'a>(files: &'a [FileRecord], folder: &str) -> Vec<&'a FileRecord> {
    let mut out: Vec<_> = files.iter().filter(|file| file.folder == folder).collect();
    out.sort_by(|a, b| {
        a.timestamp()
            .cmp(&b.timestamp())
            .then_with(|| a.filename.cmp(&b.filename))
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(key: &str, last_modified: Option<&str>) -> ObjectEntry {
        ObjectEntry {
            last_modified: last_modified.map(str::to_string),
            ..ObjectEntry::new(key)
        }
    }

    fn urls() -> UrlBase {
        UrlBase::new("https://s3.example.com", "b")
    }

    #[test]
    fn listing_builds_files_and_folders() {
        let listing = build_listing(
            vec![
                object("docs/2024.1.05..12.00.00-report.pdf", None),
                object("docs/img/cat.png", None),
            ],
            &urls(),
        );

        assert_eq!(listing.tree.folder_paths(), vec!["/docs", "/docs/img"]);
        assert_eq!(listing.files.len(), 2);
        let report = &listing.files[0];
        assert_eq!(report.folder, "/docs");
        assert_eq!(report.filename_minus_date, "report.pdf");
        assert_eq!(report.ancestors, vec!["/", "docs"]);
        assert_eq!(
            report.url,
            "https://s3.example.com/b/docs/2024.1.05..12.00.00-report.pdf"
        );
        assert_eq!(listing.files[1].folder, "/docs/img");
    }

    #[test]
    fn folder_markers_shape_tree_but_are_not_files() {
        let listing = build_listing(
            vec![object("empty/", None), object("a.txt", None)],
            &urls(),
        );
        assert_eq!(listing.tree.folder_paths(), vec!["/empty"]);
        let keys: Vec<_> = listing.files.iter().map(FileRecord::key).collect();
        assert_eq!(keys, vec!["a.txt"]);
    }

    #[test]
    fn url_is_empty_without_endpoint_and_overridable() {
        let record = FileRecord::from_object(object("a.txt", None), &UrlBase::default());
        assert_eq!(record.url, "");

        let mut base = urls();
        base.public_base = Some("https://cdn.example.com/".to_string());
        let record = FileRecord::from_object(object("docs/a b.txt", None), &base);
        assert_eq!(record.url, "https://cdn.example.com/docs/a%20b.txt");
    }

    #[test]
    fn relocate_updates_key_url_and_ancestors() {
        let mut record = FileRecord::from_object(object("docs/a.txt", None), &urls());
        record.relocate("/docs/img", &urls());
        assert_eq!(record.key(), "docs/img/a.txt");
        assert_eq!(record.data.key, "docs/img/a.txt");
        assert_eq!(record.ancestors, vec!["/", "docs", "img"]);
        assert_eq!(record.url, "https://s3.example.com/b/docs/img/a.txt");
    }

    #[test]
    fn files_in_orders_by_date_token_then_listing_time() {
        let files: Vec<_> = [
            object("docs/2024.1.05..12.00.00-old.txt", Some("2025-01-01T00:00:00Z")),
            object("docs/plain.txt", Some("2024-06-01T00:00:00Z")),
            object("docs/2024.12.01..00.00.00..00ff-new.txt", None),
            object("docs/img/other.txt", None),
        ]
        .into_iter()
        .map(|entry| FileRecord::from_object(entry, &urls()))
        .collect();

        let names: Vec<_> = files_in(&files, "/docs")
            .iter()
            .map(|file| file.filename_minus_date.as_str())
            .collect();
        assert_eq!(names, vec!["old.txt", "plain.txt", "new.txt"]);
    }

    #[test]
    fn large_listing_builds_every_folder_once() {
        let objects: Vec<_> = (0..20_000)
            .map(|i| object(&format!("d{}/s{}/f{i}.txt", i % 50, i % 1_000), None))
            .collect();
        let listing = build_listing(objects, &urls());

        assert_eq!(listing.files.len(), 20_000);
        let root = listing.tree.root();
        assert_eq!(listing.tree.children_of(root).len(), 50);
        assert_eq!(listing.tree.folder_paths().len(), 50 + 1_000);
    }

    #[test]
    fn is_within_matches_folder_and_descendants_only() {
        let record = FileRecord::from_object(object("docs/img/a.txt", None), &urls());
        assert!(record.is_within("/"));
        assert!(record.is_within("/docs"));
        assert!(record.is_within("/docs/img"));
        assert!(!record.is_within("/do"));
        assert!(!record.is_within("/docs/im"));
        assert!(!record.is_within("/docs/img/a"));
    }

    #[test]
    fn equality_ignores_metadata() {
        let a = FileRecord::from_object(object("docs/a.txt", None), &urls());
        let mut b = a.clone();
        b.data.size = 10;
        assert!(files_equal(&a, &b));
        b.relocate("/", &urls());
        assert!(!files_equal(&a, &b));
    }
}
