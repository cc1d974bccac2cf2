use bucketview_core::encode_key;
use time::{Date, Month, PrimitiveDateTime, Time};

pub const ROOT: &str = "/";

const ROUTE_PREFIX: &str = "folder";
const FILE_PREFIX: &str = "file";
const PAGE_SEGMENT: &str = "page";

/// Everything a listing needs to know about one object key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInfo {
    pub filename: String,
    pub filename_minus_date: String,
    pub name: String,
    pub date: String,
    pub extension: String,
    pub folder: String,
}

pub fn normalize_root(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

/// Splits a path into segments, always starting with the root sentinel.
pub fn split_path(path: &str) -> Vec<String> {
    let normalized = normalize_root(path);
    let mut segments = vec![ROOT.to_string()];
    if !normalized.is_empty() {
        segments.extend(normalized.split('/').map(str::to_string));
    }
    segments
}

pub fn get_file_info(key: &str) -> FileInfo {
    let normalized = normalize_root(key);
    let (folder, filename) = match normalized.rfind('/') {
        Some(index) => (
            format!("/{}", &normalized[..index]),
            &normalized[index + 1..],
        ),
        None => (ROOT.to_string(), normalized),
    };
    let (name, extension) = match filename.rfind('.') {
        Some(index) => (&filename[..index], &filename[index + 1..]),
        None => (filename, ""),
    };
    let (date, filename_minus_date) = match find_date_prefix(filename) {
        Some(found) => (
            filename[found.start..found.date_end].to_string(),
            format!("{}{}", &filename[..found.start], &filename[found.end..]),
        ),
        None => (String::new(), filename.to_string()),
    };

    FileInfo {
        filename: filename.to_string(),
        filename_minus_date,
        name: name.to_string(),
        date,
        extension: extension.to_string(),
        folder,
    }
}

/// Key prefix for objects directly inside `path`: `""` for root, `"a/b/"` otherwise.
pub fn folder_key_prefix(path: &str) -> String {
    let normalized = normalize_root(path).trim_end_matches('/');
    if normalized.is_empty() {
        String::new()
    } else {
        format!("{normalized}/")
    }
}

pub fn object_key(folder: &str, filename: &str) -> String {
    format!("{}{filename}", folder_key_prefix(folder))
}

/// Zero-byte directory marker key for a folder path. Root has no marker.
pub fn marker_key(folder_path: &str) -> Option<String> {
    let prefix = folder_key_prefix(folder_path);
    (!prefix.is_empty()).then_some(prefix)
}

pub fn join_path(parent: &str, name: &str) -> String {
    if parent == ROOT {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// `"docs//img/"` becomes `"/docs/img"`; anything empty becomes root.
pub fn normalize_folder_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|part| !part.is_empty()).collect();
    if segments.is_empty() {
        ROOT.to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

pub fn prefix_endpoint(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{endpoint}")
    }
}

/// Public path-style link for an object. Empty when no endpoint is known.
pub fn file_url(endpoint: &str, bucket: &str, key: &str) -> String {
    if endpoint.is_empty() {
        return String::new();
    }
    let base = prefix_endpoint(endpoint);
    url_under(&format!("{}/{bucket}", base.trim_end_matches('/')), key)
}

pub fn url_under(base: &str, key: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        encode_key(normalize_root(key))
    )
}

/// A route as typed by a user, e.g. `/folder/docs/img/page/2` or
/// `/file/docs/a.txt`. A file route views the folder holding the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub path: String,
    pub page: Option<u32>,
    pub file: Option<String>,
}

impl Location {
    pub fn root() -> Self {
        Self {
            path: ROOT.to_string(),
            page: None,
            file: None,
        }
    }

    pub fn parse(route: &str) -> Self {
        let trimmed = route.trim_start_matches('/');
        if let Some(key) = trimmed
            .strip_prefix(FILE_PREFIX)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|key| !key.is_empty())
        {
            return Self {
                path: get_file_info(key).folder,
                page: None,
                file: Some(key.to_string()),
            };
        }

        let mut segments: Vec<&str> = route.split('/').filter(|part| !part.is_empty()).collect();
        if segments.first() == Some(&ROUTE_PREFIX) {
            segments.remove(0);
        }

        let mut page = None;
        if let [.., marker, number] = segments.as_slice()
            && *marker == PAGE_SEGMENT
            && let Ok(value) = number.parse::<u32>()
        {
            page = Some(value);
            segments.truncate(segments.len() - 2);
        }

        Self {
            path: normalize_folder_path(&segments.join("/")),
            page,
            file: None,
        }
    }
}

struct DateMatch {
    start: usize,
    date_end: usize,
    end: usize,
}

// `YYYY.M.DD..HH.MM.SS` followed by `-`, optionally with `..xxxx(.xxxx)*`
// hex fractions before the dash. Time groups may carry a trailing dot.
fn find_date_prefix(filename: &str) -> Option<DateMatch> {
    let bytes = filename.as_bytes();
    (0..bytes.len()).find_map(|start| match_date_at(bytes, start))
}

fn match_date_at(bytes: &[u8], start: usize) -> Option<DateMatch> {
    let mut pos = digits(bytes, start, 4, 4)?;
    pos = literal(bytes, pos, b'.')?;
    pos = digits(bytes, pos, 1, 2)?;
    pos = literal(bytes, pos, b'.')?;
    pos = digits(bytes, pos, 2, 2)?;
    pos = literal(bytes, pos, b'.')?;
    pos = literal(bytes, pos, b'.')?;

    let mut digits_end = pos;
    for _ in 0..3 {
        digits_end = digits(bytes, pos, 2, 2)?;
        pos = literal(bytes, digits_end, b'.').unwrap_or(digits_end);
    }

    if bytes.get(pos) == Some(&b'-') {
        return Some(DateMatch {
            start,
            date_end: pos,
            end: pos + 1,
        });
    }

    let mut frac = literal(bytes, digits_end, b'.')?;
    frac = literal(bytes, frac, b'.')?;
    frac = hex_group(bytes, frac)?;
    while bytes.get(frac) == Some(&b'.') {
        frac = hex_group(bytes, frac + 1)?;
    }
    (bytes.get(frac) == Some(&b'-')).then_some(DateMatch {
        start,
        date_end: frac,
        end: frac + 1,
    })
}

fn digits(bytes: &[u8], pos: usize, min: usize, max: usize) -> Option<usize> {
    let count = bytes
        .iter()
        .skip(pos)
        .take(max)
        .take_while(|byte| byte.is_ascii_digit())
        .count();
    (count >= min).then_some(pos + count)
}

fn literal(bytes: &[u8], pos: usize, expected: u8) -> Option<usize> {
    (bytes.get(pos) == Some(&expected)).then_some(pos + 1)
}

fn hex_group(bytes: &[u8], pos: usize) -> Option<usize> {
    let group = bytes.get(pos..pos + 4)?;
    group
        .iter()
        .all(|byte| matches!(byte, b'0'..=b'9' | b'a'..=b'f'))
        .then_some(pos + 4)
}

/// Unix seconds of a date token as produced by [`format_date_token`],
/// read as UTC. The hex fraction is ignored.
pub fn date_token_unix(token: &str) -> Option<i64> {
    let mut parts = token.split("..");
    let day_part = parts.next()?;
    let time_part = parts.next()?;

    let mut day = day_part.split('.');
    let year: i32 = day.next()?.parse().ok()?;
    let month: u8 = day.next()?.parse().ok()?;
    let day_of_month: u8 = day.next()?.parse().ok()?;

    let mut clock = time_part.split('.').filter(|part| !part.is_empty());
    let hour: u8 = clock.next()?.parse().ok()?;
    let minute: u8 = clock.next()?.parse().ok()?;
    let second: u8 = clock.next()?.parse().ok()?;

    let date = Date::from_calendar_date(year, Month::try_from(month).ok()?, day_of_month).ok()?;
    let time = Time::from_hms(hour, minute, second).ok()?;
    Some(PrimitiveDateTime::new(date, time).assume_utc().unix_timestamp())
}

pub fn format_date_token(at: time::OffsetDateTime, fraction: u16) -> String {
    format!(
        "{}.{}.{:02}..{:02}.{:02}.{:02}..{fraction:04x}",
        at.year(),
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute(),
        at.second(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn split_path_always_starts_at_root() {
        assert_eq!(split_path("/"), vec!["/"]);
        assert_eq!(split_path(""), vec!["/"]);
        assert_eq!(split_path("/docs/img"), vec!["/", "docs", "img"]);
        assert_eq!(split_path("docs"), vec!["/", "docs"]);
    }

    #[test]
    fn file_info_for_nested_key() {
        let info = get_file_info("docs/img/cat.png");
        assert_eq!(info.folder, "/docs/img");
        assert_eq!(info.filename, "cat.png");
        assert_eq!(info.name, "cat");
        assert_eq!(info.extension, "png");
        assert_eq!(info.date, "");
        assert_eq!(info.filename_minus_date, "cat.png");
    }

    #[test]
    fn file_info_for_root_key_without_extension() {
        let info = get_file_info("README");
        assert_eq!(info.folder, "/");
        assert_eq!(info.name, "README");
        assert_eq!(info.extension, "");
    }

    #[test]
    fn folder_marker_has_empty_filename() {
        let info = get_file_info("docs/img/");
        assert_eq!(info.folder, "/docs/img");
        assert_eq!(info.filename, "");
    }

    #[test]
    fn strips_date_prefix() {
        let info = get_file_info("docs/2024.1.05..12.00.00-report.pdf");
        assert_eq!(info.date, "2024.1.05..12.00.00");
        assert_eq!(info.filename_minus_date, "report.pdf");
        assert_eq!(info.name, "2024.1.05..12.00.00-report");
    }

    #[test]
    fn strips_date_prefix_with_trailing_dot_and_fraction() {
        let dotted = get_file_info("2024.12.31..23.59.59.-a.txt");
        assert_eq!(dotted.date, "2024.12.31..23.59.59.");
        assert_eq!(dotted.filename_minus_date, "a.txt");

        let fractional = get_file_info("2024.3.07..08.09.10..1a2b-a.txt");
        assert_eq!(fractional.date, "2024.3.07..08.09.10..1a2b");
        assert_eq!(fractional.filename_minus_date, "a.txt");
    }

    #[test]
    fn date_match_anywhere_in_name_is_removed() {
        let info = get_file_info("copy of 2024.1.05..12.00.00-report.pdf");
        assert_eq!(info.date, "2024.1.05..12.00.00");
        assert_eq!(info.filename_minus_date, "copy of report.pdf");
    }

    #[test]
    fn rejects_incomplete_date() {
        for name in ["2024.1.05..12.00-a.txt", "2024.1.5..12.00.00-a.txt", "2024.1.05..12.00.00a.txt"] {
            let info = get_file_info(name);
            assert_eq!(info.date, "", "{name}");
            assert_eq!(info.filename_minus_date, name);
        }
    }

    #[test]
    fn folder_and_filename_recompose_key() {
        for key in ["a.txt", "docs/a.txt", "/docs/img/cat.png", "x/y/z/"] {
            let info = get_file_info(key);
            let rebuilt = join_path(&info.folder, &info.filename);
            assert_eq!(normalize_root(&rebuilt), normalize_root(key), "{key}");
        }
    }

    #[test]
    fn key_prefixes() {
        assert_eq!(folder_key_prefix("/"), "");
        assert_eq!(folder_key_prefix("/docs/img"), "docs/img/");
        assert_eq!(object_key("/docs", "a.txt"), "docs/a.txt");
        assert_eq!(object_key("/", "a.txt"), "a.txt");
        assert_eq!(marker_key("/docs/New Folder").as_deref(), Some("docs/New Folder/"));
        assert_eq!(marker_key("/"), None);
    }

    #[test]
    fn folder_paths_are_normalized() {
        assert_eq!(normalize_folder_path(""), "/");
        assert_eq!(normalize_folder_path("/"), "/");
        assert_eq!(normalize_folder_path("docs//img/"), "/docs/img");
    }

    #[test]
    fn file_url_escapes_segments() {
        assert_eq!(
            file_url("s3.example.com", "b", "docs/a b.txt"),
            "https://s3.example.com/b/docs/a%20b.txt"
        );
        assert_eq!(
            file_url("http://localhost:9000/", "b", "a.txt"),
            "http://localhost:9000/b/a.txt"
        );
        assert_eq!(file_url("", "b", "a.txt"), "");
    }

    #[test]
    fn location_strips_route_prefix_and_page() {
        assert_eq!(Location::parse("/"), Location::root());
        assert_eq!(Location::parse("/folder"), Location::root());
        assert_eq!(
            Location::parse("/folder/docs/img/page/2"),
            Location {
                path: "/docs/img".to_string(),
                page: Some(2),
                file: None,
            }
        );
        assert_eq!(Location::parse("docs/").path, "/docs");
        assert_eq!(Location::parse("/docs/page/x").path, "/docs/page/x");
    }

    #[test]
    fn file_route_views_the_containing_folder() {
        let location = Location::parse("/file/docs/img/cat.png");
        assert_eq!(location.path, "/docs/img");
        assert_eq!(location.file.as_deref(), Some("docs/img/cat.png"));

        let location = Location::parse("/file/readme.md");
        assert_eq!(location.path, "/");
        assert_eq!(location.file.as_deref(), Some("readme.md"));

        assert_eq!(Location::parse("/files/a.txt").file, None);
    }

    #[test]
    fn date_token_round_trips_to_unix() {
        let at = datetime!(2024-01-05 12:00:00 UTC);
        let token = format_date_token(at, 0x1a2b);
        assert_eq!(token, "2024.1.05..12.00.00..1a2b");
        assert_eq!(date_token_unix(&token), Some(at.unix_timestamp()));
        assert_eq!(date_token_unix("2024.1.05..12.00.00."), Some(at.unix_timestamp()));
        assert_eq!(date_token_unix("garbage"), None);
    }
}
