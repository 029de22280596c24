//! Path and pattern helpers shared by the cache readers and the facade.
//!
//! Remote object paths are plain strings (URLs or local paths); these helpers
//! deliberately avoid `std::path::Path` so that `s3://bucket/key` style paths
//! are handled the same way as `/local/file`.

/// Extract the final component of a path, i.e. everything after the last
/// separator. URLs and local paths both use `/`.
pub fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Join a directory and a file name with a single separator.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Whether `pattern` contains glob metacharacters. Literal paths bypass the
/// glob cache entirely.
pub fn has_glob_metachars(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', ']'])
}

/// Minimal glob matcher supporting `*`, `?` and `[...]` character classes.
///
/// Sufficient for the patterns the local stand-in filesystem sees; remote
/// transports implement their own globbing.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = name.chars().collect();
    glob_match_impl(&pat, &txt)
}

fn glob_match_impl(pat: &[char], txt: &[char]) -> bool {
    if pat.is_empty() {
        return txt.is_empty();
    }
    match pat[0] {
        '*' => {
            // Try consuming zero or more characters.
            for skip in 0..=txt.len() {
                if glob_match_impl(&pat[1..], &txt[skip..]) {
                    return true;
                }
            }
            false
        }
        '[' => {
            let Some(close) = pat.iter().position(|&c| c == ']') else {
                // Unterminated class matches itself literally.
                return !txt.is_empty() && txt[0] == '[' && glob_match_impl(&pat[1..], &txt[1..]);
            };
            if txt.is_empty() {
                return false;
            }
            let class = &pat[1..close];
            if class_contains(class, txt[0]) {
                glob_match_impl(&pat[close + 1..], &txt[1..])
            } else {
                false
            }
        }
        '?' => !txt.is_empty() && glob_match_impl(&pat[1..], &txt[1..]),
        c => !txt.is_empty() && txt[0] == c && glob_match_impl(&pat[1..], &txt[1..]),
    }
}

fn class_contains(class: &[char], c: char) -> bool {
    let mut idx = 0;
    while idx < class.len() {
        if idx + 2 < class.len() && class[idx + 1] == '-' {
            if class[idx] <= c && c <= class[idx + 2] {
                return true;
            }
            idx += 3;
        } else {
            if class[idx] == c {
                return true;
            }
            idx += 1;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("/tmp/cache/foo.parquet"), "foo.parquet");
        assert_eq!(file_name("https://host/a/b.csv"), "b.csv");
        assert_eq!(file_name("bare"), "bare");
        assert_eq!(file_name("/trailing/"), "");
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("/tmp", "f"), "/tmp/f");
        assert_eq!(join_path("/tmp/", "f"), "/tmp/f");
    }

    #[test]
    fn test_has_glob_metachars() {
        assert!(has_glob_metachars("/tmp/*.csv"));
        assert!(has_glob_metachars("/tmp/file?.csv"));
        assert!(has_glob_metachars("/tmp/[ab].csv"));
        assert!(!has_glob_metachars("/tmp/plain.csv"));
    }

    #[test]
    fn test_glob_match_star() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("*.csv", "data.csv"));
        assert!(!glob_match("*.csv", "data.parquet"));
        assert!(glob_match("a*b*c", "aXXbYYc"));
    }

    #[test]
    fn test_glob_match_question_and_class() {
        assert!(glob_match("file?.txt", "file1.txt"));
        assert!(!glob_match("file?.txt", "file12.txt"));
        assert!(glob_match("file[0-9].txt", "file7.txt"));
        assert!(!glob_match("file[0-9].txt", "filex.txt"));
        assert!(glob_match("file[ab].txt", "filea.txt"));
    }
}
