//! 缓存键模块
//! 键格式为 `{path}:{query}`，query 按参数名排序后重新做 form 编码，无参数时为 `all`

use axum::http::Uri;
use url::form_urlencoded;

/// 无查询参数时使用的占位符
pub const EMPTY_QUERY_TOKEN: &str = "all";

/// 由路由路径与查询参数生成确定性的缓存键
///
/// 参数先解码再排序，最后统一编码，值里的 `&`、`=` 不会和分隔符混淆。
pub fn response_cache_key(uri: &Uri) -> String {
    let mut params: Vec<(String, String)> =
        form_urlencoded::parse(uri.query().unwrap_or_default().as_bytes())
            .into_owned()
            .collect();
    params.sort();

    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(&params)
        .finish();

    format!(
        "{}:{}",
        uri.path(),
        if query.is_empty() { EMPTY_QUERY_TOKEN } else { query.as_str() }
    )
}

/// 某个路径下所有查询组合的键，例如 `/api/rides:*`
pub fn namespace_pattern(path: &str) -> String {
    format!("{}:*", escape_glob(path))
}

/// 以该路径为前缀的所有键，包括子资源，例如 `/api/rides*`
pub fn prefix_pattern(path: &str) -> String {
    format!("{}*", escape_glob(path))
}

fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

enum Token {
    Star,
    Single,
    Literal(char),
}

fn tokenize(pattern: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '*' => Token::Star,
            '?' => Token::Single,
            '\\' => Token::Literal(chars.next().unwrap_or('\\')),
            c => Token::Literal(c),
        });
    }
    tokens
}

/// Redis KEYS 风格的 glob 匹配，支持 `*`、`?` 与反斜杠转义
///
/// 只回溯到最近的 `*`，耗时与 pattern 长度乘 key 长度成正比。
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let tokens = tokenize(pattern);
    let key: Vec<char> = key.chars().collect();

    let (mut p, mut k) = (0, 0);
    // 最近一个 `*` 的位置，以及它当前吞到的 key 位置
    let mut last_star: Option<(usize, usize)> = None;

    while k < key.len() {
        match tokens.get(p) {
            Some(Token::Star) => {
                last_star = Some((p, k));
                p += 1;
            }
            Some(Token::Single) => {
                p += 1;
                k += 1;
            }
            Some(Token::Literal(c)) if *c == key[k] => {
                p += 1;
                k += 1;
            }
            _ => match last_star {
                Some((star, consumed)) => {
                    p = star + 1;
                    k = consumed + 1;
                    last_star = Some((star, consumed + 1));
                }
                None => return false,
            },
        }
    }

    tokens[p..].iter().all(|t| matches!(t, Token::Star))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(uri: &str) -> String {
        response_cache_key(&uri.parse::<Uri>().unwrap())
    }

    #[test]
    fn empty_query_uses_all_token() {
        assert_eq!(key("/api/rides"), "/api/rides:all");
    }

    #[test]
    fn query_parameters_are_sorted_by_name() {
        assert_eq!(
            key("/api/rides?page=2&limit=10&departureCity=Lyon"),
            "/api/rides:departureCity=Lyon&limit=10&page=2"
        );
        assert_eq!(key("/api/rides?limit=10&page=2"), key("/api/rides?page=2&limit=10"));
    }

    #[test]
    fn equivalent_encodings_share_a_key() {
        assert_eq!(
            key("/api/profiles?username=jean%20paul"),
            "/api/profiles:username=jean+paul"
        );
        assert_eq!(
            key("/api/profiles?username=jean+paul"),
            key("/api/profiles?username=jean%20paul")
        );
    }

    #[test]
    fn encoded_separators_do_not_collide_with_real_ones() {
        let smuggled = key("/api/rides?departureCity=Lyon%26limit%3D1");
        let plain = key("/api/rides?departureCity=Lyon&limit=1");
        assert_ne!(smuggled, plain);
        assert_eq!(smuggled, "/api/rides:departureCity=Lyon%26limit%3D1");
        assert_eq!(plain, "/api/rides:departureCity=Lyon&limit=1");
    }

    #[test]
    fn empty_query_string_uses_all_token() {
        assert_eq!(key("/api/rides?"), "/api/rides:all");
    }

    #[test]
    fn namespace_pattern_matches_list_keys_only() {
        let pattern = namespace_pattern("/api/rides");
        assert!(glob_match(&pattern, "/api/rides:all"));
        assert!(glob_match(&pattern, "/api/rides:limit=10&page=2"));
        assert!(!glob_match(&pattern, "/api/rides/42:all"));
    }

    #[test]
    fn prefix_pattern_matches_items_too() {
        let pattern = prefix_pattern("/api/rides");
        assert!(glob_match(&pattern, "/api/rides:all"));
        assert!(glob_match(&pattern, "/api/rides/42:all"));
        assert!(!glob_match(&pattern, "/api/profiles:all"));
    }

    #[test]
    fn glob_metacharacters_in_paths_are_literal() {
        let pattern = namespace_pattern("/api/rides/a*b");
        assert!(glob_match(&pattern, "/api/rides/a*b:all"));
        assert!(!glob_match(&pattern, "/api/rides/axxb:all"));
    }

    #[test]
    fn many_stars_do_not_backtrack_exponentially() {
        let key = "a".repeat(200);
        assert!(!glob_match("a*a*a*a*a*a*a*a*a*a*a*a*b", &key));
        assert!(glob_match("a*a*a*a*a*a*a*a*a*a*a*a*", &key));
    }

    #[test]
    fn trailing_stars_match_empty_rest() {
        assert!(glob_match("/api/rides**", "/api/rides"));
        assert!(!glob_match("/api/rides*x", "/api/rides"));
    }

    #[test]
    fn question_mark_matches_single_char() {
        assert!(glob_match("ride:?", "ride:1"));
        assert!(!glob_match("ride:?", "ride:12"));
    }
}
