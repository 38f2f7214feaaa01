use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Asia::Shanghai;
use url::Url;

use crate::models::Language;

/// Query parameters that only identify the click, not the resource.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "igshid", "spm", "ref", "ref_src", "mc_cid", "mc_eid"];

/// Canonicalize a URL so that equivalent links hash to the same item id:
/// lowercase scheme and host, drop the fragment, strip tracking params.
/// Idempotent; returns the input unchanged when it does not parse.
pub fn canonicalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        let query: String = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(kept)
            .finish();
        url.set_query(Some(&query));
    }

    // Url already lowercases scheme and host on parse
    url.to_string()
}

/// Stable item id: md5 of the canonical URL. The same scheme the companion
/// hourly pipeline uses, so ids line up across the shared archive.
pub fn item_id(url: &str) -> String {
    format!("{:x}", md5::compute(canonicalize_url(url).as_bytes()))
}

/// Repair text that was UTF-8 on the wire but decoded as Latin-1
/// ("â€™", "ä¸­æ–‡"-style garbage). Detection looks for a UTF-8 lead byte
/// followed by a continuation byte, both mapped into U+0080..U+00FF.
/// Idempotent: repaired text no longer matches the pattern.
pub fn fix_mojibake(text: &str) -> String {
    if !looks_like_mojibake(text) {
        return text.to_string();
    }
    let bytes: Vec<u8> = text.chars().map(|c| c as u32 as u8).collect();
    match String::from_utf8(bytes) {
        Ok(repaired) => repaired,
        Err(_) => text.to_string(),
    }
}

fn looks_like_mojibake(text: &str) -> bool {
    if text.chars().any(|c| c as u32 > 0xFF) {
        return false;
    }
    let chars: Vec<u32> = text.chars().map(|c| c as u32).collect();
    chars
        .windows(2)
        .any(|w| (0xC2..=0xF4).contains(&w[0]) && (0x80..=0xBF).contains(&w[1]))
}

/// Fraction of Han characters in the string.
pub fn han_ratio(text: &str) -> f64 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }
    let han = text.chars().filter(|c| ('\u{4e00}'..='\u{9fff}').contains(c)).count();
    han as f64 / total as f64
}

/// Titles with ≥30% Han characters are treated as Chinese.
pub fn detect_language(title: &str) -> Language {
    if han_ratio(title) >= 0.3 { Language::Zh } else { Language::En }
}

/// Parse a timestamp string of unknown format. Naive values are assumed UTC.
pub fn parse_flexible_time(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y/%m/%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    None
}

/// Display timestamp in the editorial timezone (Asia/Shanghai).
pub fn format_shanghai(dt: DateTime<Utc>, fmt: &str) -> String {
    dt.with_timezone(&Shanghai).format(fmt).to_string()
}

/// "M月D日" as used in report headers and WeCom pushes.
pub fn report_date(now: DateTime<Utc>) -> String {
    let local = now.with_timezone(&Shanghai);
    use chrono::Datelike;
    format!("{}月{}日", local.month(), local.day())
}

/// Display-name fixes for sources whose raw names are IDs or noise.
const SOURCE_DISPLAY_NAMES: &[(&str, &str, &str)] = &[
    ("techmeme", "", "Techmeme"),
    ("aihubtoday", "", "AI Hub Today"),
    ("36kr_ai", "", "36氪"),
    ("opmlrss", "", "RSS订阅"),
    ("hackernews", "", "Hacker News"),
];

/// Map (site_id, raw_source) to a display name. Unknown combinations keep
/// the raw source, falling back to the site id.
pub fn normalize_source_display(site_id: &str, raw_source: &str) -> String {
    for (sid, src, display) in SOURCE_DISPLAY_NAMES {
        if *sid == site_id && *src == raw_source {
            return display.to_string();
        }
    }
    if raw_source.is_empty() {
        site_id.to_string()
    } else {
        raw_source.to_string()
    }
}

/// Placeholder entries some aggregator sites emit instead of articles.
pub fn is_placeholder_title(site_id: &str, title: &str) -> bool {
    if site_id != "aihubtoday" {
        return false;
    }
    let t = title.trim();
    t.is_empty()
        || t == "AI Hub Today"
        || t.starts_with("AI资讯日报")
        || t.starts_with("今日AI资讯")
        || t.starts_with("每日AI快讯")
}

/// Similarity of two strings as a longest-common-subsequence ratio:
/// 2·|LCS| / (|a| + |b|), over characters. 1.0 means identical.
pub fn lcs_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    // Single-row DP; titles are short so this stays cheap.
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for &ca in &a {
        for (j, &cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    let lcs = prev[b.len()];
    2.0 * lcs as f64 / (a.len() + b.len()) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_strips_fragment_and_tracking() {
        let canon = canonicalize_url("HTTPS://Example.COM/Path?utm_source=x&id=42&fbclid=abc#section");
        assert_eq!(canon, "https://example.com/Path?id=42");
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let urls = [
            "https://example.com/a?utm_campaign=x&q=1#frag",
            "http://EXAMPLE.com/B",
            "https://a.cn/路径?x=中",
            "not a url at all",
        ];
        for u in urls {
            let once = canonicalize_url(u);
            assert_eq!(canonicalize_url(&once), once, "not idempotent for {u}");
        }
    }

    #[test]
    fn equivalent_urls_share_an_id() {
        assert_eq!(
            item_id("https://Example.com/post?utm_source=rss#top"),
            item_id("https://example.com/post")
        );
    }

    #[test]
    fn mojibake_roundtrip_repairs() {
        // "中文" encoded UTF-8 then decoded as Latin-1
        let garbled: String = "中文".bytes().map(|b| b as char).collect();
        assert_eq!(fix_mojibake(&garbled), "中文");
    }

    #[test]
    fn mojibake_repair_is_idempotent() {
        for s in ["中文标题", "plain ascii", "café", "â€™ smart quote"] {
            let once = fix_mojibake(s);
            assert_eq!(fix_mojibake(&once), once, "not idempotent for {s}");
        }
    }

    #[test]
    fn clean_text_passes_through() {
        assert_eq!(fix_mojibake("OpenAI 发布 GPT-5"), "OpenAI 发布 GPT-5");
    }

    #[test]
    fn language_by_han_ratio() {
        assert_eq!(detect_language("OpenAI launches GPT-5"), Language::En);
        assert_eq!(detect_language("OpenAI 发布新一代模型"), Language::Zh);
        // A third Han characters clears the 30% boundary
        assert_eq!(detect_language("模型上线 abcdefg"), Language::Zh);
        assert_eq!(detect_language("大模型上线 abcde"), Language::Zh);
        // Below the boundary stays English
        assert_eq!(detect_language("模型上线 abcdefghij"), Language::En);
    }

    #[test]
    fn flexible_time_accepts_common_formats() {
        assert!(parse_flexible_time("2025-01-10T12:00:00Z").is_some());
        assert!(parse_flexible_time("Fri, 10 Jan 2025 12:00:00 GMT").is_some());
        assert!(parse_flexible_time("2025-01-10 12:00:00").is_some());
        assert!(parse_flexible_time("garbage").is_none());
        assert!(parse_flexible_time("").is_none());
    }

    #[test]
    fn naive_time_is_utc() {
        let dt = parse_flexible_time("2025-01-10 08:00:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-01-10T08:00:00+00:00");
    }

    #[test]
    fn lcs_ratio_bounds() {
        assert_eq!(lcs_ratio("abc", "abc"), 1.0);
        assert_eq!(lcs_ratio("abc", "xyz"), 0.0);
        let r = lcs_ratio("openai launches gpt5", "openai announces gpt5");
        assert!(r > 0.7 && r < 1.0);
    }

    #[test]
    fn display_name_lookup() {
        assert_eq!(normalize_source_display("techmeme", ""), "Techmeme");
        assert_eq!(normalize_source_display("techmeme", "The Verge"), "The Verge");
        assert_eq!(normalize_source_display("unknown_site", ""), "unknown_site");
    }

    #[test]
    fn placeholder_titles_only_for_known_site() {
        assert!(is_placeholder_title("aihubtoday", "AI资讯日报 1月10日"));
        assert!(!is_placeholder_title("techmeme", "AI资讯日报 1月10日"));
        assert!(!is_placeholder_title("aihubtoday", "OpenAI ships new model"));
    }
}
