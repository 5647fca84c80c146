//! Attachment extension exclusion policy.

/// Decides which attachments a task's exclusion list rules out.
///
/// Extensions are compared case-insensitively and without the leading
/// dot. A message whose attachments are all excluded is skipped before
/// any step runs.
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    extensions: Vec<String>,
}

impl ExclusionFilter {
    /// Parses a comma-separated extension list as stored on the task.
    pub fn from_list(list: Option<&str>) -> Self {
        let extensions = list
            .unwrap_or_default()
            .split(',')
            .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        Self { extensions }
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// True when the file name's extension is on the exclusion list.
    /// Names without an extension are never excluded.
    pub fn is_excluded(&self, file_name: &str) -> bool {
        let Some((stem, ext)) = file_name.rsplit_once('.') else {
            return false;
        };
        if stem.is_empty() {
            return false;
        }
        self.extensions.iter().any(|e| ext.eq_ignore_ascii_case(e))
    }

    /// True when every attachment is excluded. An empty attachment list
    /// excludes nothing.
    pub fn all_excluded(&self, names: &[String]) -> bool {
        !names.is_empty() && names.iter().all(|n| self.is_excluded(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        let filter = ExclusionFilter::from_list(Some("exe, .BAT,,zip"));
        assert!(filter.is_excluded("setup.exe"));
        assert!(filter.is_excluded("run.bat"));
        assert!(filter.is_excluded("archive.ZIP"));
        assert!(!filter.is_excluded("report.pdf"));
    }

    #[test]
    fn test_empty_list_excludes_nothing() {
        let filter = ExclusionFilter::from_list(None);
        assert!(filter.is_empty());
        assert!(!filter.is_excluded("setup.exe"));
        assert!(!filter.all_excluded(&["setup.exe".to_string()]));
    }

    #[test]
    fn test_no_extension_never_excluded() {
        let filter = ExclusionFilter::from_list(Some("exe"));
        assert!(!filter.is_excluded("README"));
        assert!(!filter.is_excluded(".exe"));
    }

    #[test]
    fn test_all_excluded() {
        let filter = ExclusionFilter::from_list(Some("exe,bat"));
        assert!(filter.all_excluded(&["a.exe".to_string(), "b.bat".to_string()]));
        assert!(!filter.all_excluded(&["a.exe".to_string(), "c.pdf".to_string()]));
        assert!(!filter.all_excluded(&[]));
    }
}
