//! Best-effort nominative forms of locality names for geocoding lookups.
//!
//! Users write "погода в Москве" or "weather in «Сочи» today"; the geocoder
//! wants "Москва" and "Сочи". A miss here degrades to "city not found" at the
//! provider, never to an error.

use std::sync::LazyLock;

use regex::Regex;

/// Locative forms that the suffix heuristic gets wrong or cannot reach.
const KNOWN_LOCATIVES: &[(&str, &str)] = &[
    ("москве", "Москва"),
    ("санкт-петербурге", "Санкт-Петербург"),
    ("ростове-на-дону", "Ростов-на-Дону"),
    ("нижнем новгороде", "Нижний Новгород"),
    ("екатеринбурге", "Екатеринбург"),
    ("новосибирске", "Новосибирск"),
    ("краснодаре", "Краснодар"),
    ("воронеже", "Воронеж"),
    ("самаре", "Самара"),
    ("тюмени", "Тюмень"),
    ("перми", "Пермь"),
    ("казани", "Казань"),
    ("уфе", "Уфа"),
    ("твери", "Тверь"),
    ("ярославле", "Ярославль"),
    ("сочи", "Сочи"),
    ("париже", "Париж"),
];

static LOCATIVE_E: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[А-ЯЁ][а-яё\- ]+е$").expect("locative regex should compile"));

static CITY_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\sгород").expect("city word regex should compile"));

static QUOTES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[«»"“”]"#).expect("quote regex should compile"));

static CITY_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:г\.|город|city)\s+").expect("city prefix regex should compile")
});

static TEMPORAL_TAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s+(?:прямо\s+сейчас|сейчас|сегодня|right\s+now|now|today)\s*$")
        .expect("temporal tail regex should compile")
});

static TRAILING_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.,!?;:]+$").expect("punctuation regex should compile"));

static SPACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex should compile"));

/// Turn a free-text locality into something a geocoder can look up.
///
/// First match wins: the known-locative table, then the `…е` → `…а` suffix
/// rule, then plain cleanup of quotes, prefixes, temporal words and punctuation.
pub fn normalize_city(city: &str) -> String {
    let trimmed = city.trim();
    let key = trimmed.to_lowercase();

    if let Some((_, nominative)) = KNOWN_LOCATIVES.iter().find(|(locative, _)| *locative == key) {
        return (*nominative).to_string();
    }

    if LOCATIVE_E.is_match(trimmed) && !CITY_WORD.is_match(trimmed) {
        let mut base = trimmed.to_string();
        base.pop();
        base.push('а');
        return base;
    }

    strip_decorations(trimmed)
}

/// Drop temporal qualifiers such as "сегодня" or "right now" from the end.
pub fn strip_temporal(text: &str) -> String {
    TEMPORAL_TAIL.replace(text, "").into_owned()
}

fn strip_decorations(city: &str) -> String {
    let unquoted = QUOTES.replace_all(city, "");
    let unprefixed = CITY_PREFIX.replace(unquoted.trim(), "");
    let unpunctuated = TRAILING_PUNCT.replace(&unprefixed, "");
    let untimed = TEMPORAL_TAIL.replace(&unpunctuated, "");
    let unpunctuated = TRAILING_PUNCT.replace(&untimed, "");
    SPACES.replace_all(&unpunctuated, " ").trim().to_string()
}
