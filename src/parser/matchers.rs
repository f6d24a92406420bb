//! The ordered matcher stages of the parser cascade.
//!
//! Every stage takes the lowercased query text and accumulates onto the
//! [`ParsedQuery`]. Keyword tables mix Russian and English surface forms.
//! Within a stage, "first match wins" applies to single-valued fragments
//! (entity type, level, limit) and "all matches accumulate" to set-valued
//! ones (sectors, statuses, categories, comparisons).

use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;

use super::{CmpOp, CmpValue, Comparison, GeoFilter, ParsedQuery, QueryIntent};
use crate::model::ClearanceLevel;

// ---------------------------------------------------------------------------
// Stage 2: entity detection (+ count intent)
// ---------------------------------------------------------------------------

/// Ordered keyword groups: (surface forms, entity type, default intent).
/// First group with a hit wins.
const ENTITY_GROUPS: &[(&[&str], &str, QueryIntent)] = &[
    (
        &[
            "беспилотник",
            "бпла",
            "дрон",
            "uav",
            "drone",
        ],
        "Target",
        QueryIntent::List,
    ),
    (
        &["цель", "цели", "целей", "целям", "target"],
        "Target",
        QueryIntent::List,
    ),
    (
        &[
            "сенсор",
            "датчик",
            "радар",
            "sensor",
            "radar",
        ],
        "Sensor",
        QueryIntent::List,
    ),
    (
        &[
            "событи",
            "обнаружени",
            "event",
            "detection",
        ],
        "Event",
        QueryIntent::Timeline,
    ),
    (
        &["штаб", "командный пункт", "command post", "кп "],
        "CommandPost",
        QueryIntent::List,
    ),
];

const COUNT_WORDS: &[&str] = &["сколько", "how many", "count", "количество", "число"];

pub(super) fn match_entity(lower: &str, query: &mut ParsedQuery) {
    for (words, entity, intent) in ENTITY_GROUPS {
        if let Some(hit) = words.iter().find(|w| lower.contains(**w)) {
            query.entity_type = Some((*entity).to_string());
            query.intent = *intent;
            query.recognize(*hit, "entity");
            break;
        }
    }
    // An explicit count word overrides the group's default intent.
    if let Some(hit) = COUNT_WORDS.iter().find(|w| lower.contains(**w)) {
        query.intent = QueryIntent::Count;
        query.recognize(*hit, "intent");
    }
}

// ---------------------------------------------------------------------------
// Stage 3: logic operator
// ---------------------------------------------------------------------------

pub(super) fn match_logic(lower: &str, query: &mut ParsedQuery) {
    let has_or = lower
        .split(|c: char| c.is_whitespace() || c == ',')
        .any(|t| t == "или" || t == "or");
    if has_or {
        query.use_or = true;
        query.recognize("or", "logic");
    }
}

// ---------------------------------------------------------------------------
// Stage 4: sector extraction
// ---------------------------------------------------------------------------

static RE_SECTOR_RU: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"сектор[ауе]?\s+([a-zа-яё])\b").unwrap()
});
static RE_SECTOR_EN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"sector\s+([a-zа-яё])\b").unwrap());

/// Uppercase a sector letter, folding Cyrillic homoglyphs onto their Latin
/// doubles so "сектор а" and "sector A" name the same sector code.
fn normalize_sector(letter: &str) -> String {
    let c = letter.chars().next().unwrap_or('?');
    let folded = match c.to_uppercase().next().unwrap_or('?') {
        'А' => 'A',
        'В' => 'B',
        'С' => 'C',
        'Е' => 'E',
        'К' => 'K',
        'М' => 'M',
        'Н' => 'H',
        'О' => 'O',
        'Р' => 'P',
        'Т' => 'T',
        'Х' => 'X',
        other => other,
    };
    folded.to_string()
}

pub(super) fn match_sectors(lower: &str, query: &mut ParsedQuery) {
    for re in [&*RE_SECTOR_RU, &*RE_SECTOR_EN] {
        for caps in re.captures_iter(lower) {
            let code = normalize_sector(&caps[1]);
            query.recognize(caps[0].to_string(), "sector");
            query.sectors.insert(code);
        }
    }
}

// ---------------------------------------------------------------------------
// Stage 5: status extraction
// ---------------------------------------------------------------------------

/// Surface form → normalized status. Negated forms must precede their
/// positive stems ("не активен" before "активен").
const STATUS_WORDS: &[(&str, &str)] = &[
    ("не активен", "offline"),
    ("не активны", "offline"),
    ("неактивен", "offline"),
    ("неактивны", "offline"),
    ("офлайн", "offline"),
    ("оффлайн", "offline"),
    ("offline", "offline"),
    ("inactive", "offline"),
    ("выключен", "offline"),
    ("онлайн", "online"),
    ("online", "online"),
    ("активен", "online"),
    ("активны", "online"),
    ("active", "online"),
    ("в сети", "online"),
];

pub(super) fn match_statuses(lower: &str, query: &mut ParsedQuery) {
    let mut consumed: Vec<&str> = Vec::new();
    for (word, status) in STATUS_WORDS {
        // A matched negated form shadows its positive stem.
        if lower.contains(word) && !consumed.iter().any(|c| c.contains(word)) {
            query.statuses.insert((*status).to_string());
            query.recognize(*word, "status");
            consumed.push(word);
        }
    }
}

// ---------------------------------------------------------------------------
// Stage 6: category extraction
// ---------------------------------------------------------------------------

const CATEGORY_WORDS: &[(&str, &str)] = &[
    ("вертолет", "helicopter"),
    ("вертолёт", "helicopter"),
    ("helicopter", "helicopter"),
    ("беспилотник", "uav"),
    ("бпла", "uav"),
    ("дрон", "uav"),
    ("uav", "uav"),
    ("drone", "uav"),
    ("неизвестн", "unknown"),
    ("unknown", "unknown"),
    ("unidentified", "unknown"),
    ("авиагрупп", "airgroup"),
    ("airgroup", "airgroup"),
    ("air group", "airgroup"),
];

static RE_CATEGORY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:категори[яию]|category)\s+([a-zа-яё][a-zа-яё0-9_-]*)").unwrap()
});

/// Normalize free category text into the closed vocabulary, passing unknown
/// values through lowercased.
pub fn normalize_category(raw: &str) -> String {
    let raw = raw.trim().to_lowercase();
    for (word, category) in CATEGORY_WORDS {
        if raw.contains(word) {
            return (*category).to_string();
        }
    }
    raw
}

pub(super) fn match_categories(lower: &str, query: &mut ParsedQuery) {
    for (word, category) in CATEGORY_WORDS {
        if lower.contains(word) {
            query.categories.insert((*category).to_string());
            query.recognize(*word, "category");
        }
    }
    for caps in RE_CATEGORY.captures_iter(lower) {
        query.categories.insert(normalize_category(&caps[1]));
        query.recognize(caps[0].to_string(), "category");
    }
}

// ---------------------------------------------------------------------------
// Stage 7: classification-level keyword
// ---------------------------------------------------------------------------

/// Ordered: negated/longer aliases first ("несекретно" would otherwise be
/// shadowed by "секретно" as a substring).
const LEVEL_WORDS: &[(&str, ClearanceLevel)] = &[
    ("несекретно", ClearanceLevel::Unclassified),
    ("unclassified", ClearanceLevel::Unclassified),
    ("открыт", ClearanceLevel::Unclassified),
    ("конфиденциально", ClearanceLevel::Confidential),
    ("confidential", ClearanceLevel::Confidential),
    ("дсп", ClearanceLevel::Confidential),
    ("секретно", ClearanceLevel::Secret),
    ("secret", ClearanceLevel::Secret),
];

pub(super) fn match_level(lower: &str, query: &mut ParsedQuery) {
    for (word, level) in LEVEL_WORDS {
        if lower.contains(word) {
            query.level = Some(*level);
            query.recognize(*word, "level");
            return;
        }
    }
    // Single-letter codes as standalone tokens: "гриф s", "level c".
    static RE_LEVEL_CODE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?:гриф|уровень|level|classification)\s+([ucs])\b").unwrap()
    });
    if let Some(caps) = RE_LEVEL_CODE.captures(lower) {
        query.level = Some(ClearanceLevel::parse_loose(&caps[1]));
        query.recognize(caps[0].to_string(), "level");
    }
}

// ---------------------------------------------------------------------------
// Stage 8: relative time window
// ---------------------------------------------------------------------------

static RE_REL_RU: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:за\s+)?последн\w*\s+(\d+)\s*(минут\w*|час\w*|сут\w*|дн\w*)").unwrap()
});
static RE_REL_EN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:last|within|past)\s+(\d+)\s*(minute\w*|min\w*|hour\w*|hr\w*|day\w*)").unwrap()
});

fn unit_to_hours(count: f64, unit: &str) -> f64 {
    if unit.starts_with("мин") || unit.starts_with("min") {
        count / 60.0
    } else if unit.starts_with("сут") || unit.starts_with("дн") || unit.starts_with("day") {
        count * 24.0
    } else {
        count
    }
}

pub(super) fn match_relative_window(lower: &str, query: &mut ParsedQuery) {
    for re in [&*RE_REL_RU, &*RE_REL_EN] {
        if let Some(caps) = re.captures(lower) {
            if let Ok(count) = caps[1].parse::<f64>() {
                query.window_hours = Some(unit_to_hours(count, &caps[2]));
                query.recognize(caps[0].to_string(), "time-window");
                return;
            }
        }
    }
    // "right now" means the last 15 minutes.
    if lower.contains("прямо сейчас") || lower.contains("right now") {
        query.window_hours = Some(0.25);
        query.recognize("right now", "time-window");
    }
}

// ---------------------------------------------------------------------------
// Stage 9: absolute time range
// ---------------------------------------------------------------------------

static RE_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:с|from|between)\s+(\d{1,2}):(\d{2})\s*(?:до|по|to|and)\s*(\d{1,2}):(\d{2})")
        .unwrap()
});

/// Both times resolve against the reference instant's date (the dataset's
/// nominal "current" day). A range that wraps past midnight pushes the end
/// into the next day.
pub(super) fn match_absolute_range(
    lower: &str,
    reference: DateTime<Utc>,
    query: &mut ParsedQuery,
) {
    let Some(caps) = RE_RANGE.captures(lower) else {
        return;
    };
    let (Ok(h1), Ok(m1), Ok(h2), Ok(m2)) = (
        caps[1].parse::<u32>(),
        caps[2].parse::<u32>(),
        caps[3].parse::<u32>(),
        caps[4].parse::<u32>(),
    ) else {
        return;
    };
    let date = reference.date_naive();
    let (Some(start), Some(end)) = (date.and_hms_opt(h1, m1, 0), date.and_hms_opt(h2, m2, 0))
    else {
        return;
    };
    let start = start.and_utc();
    let mut end = end.and_utc();
    if end < start {
        end += Duration::hours(24);
    }
    query.time_range = Some((start, end));
    query.recognize(caps[0].to_string(), "time-range");
}

// ---------------------------------------------------------------------------
// Stage 10: result limit
// ---------------------------------------------------------------------------

static RE_LIMIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:первые|первых|покажи|последние|last|first|show|top)\s+(\d+)(?:\s+([a-zа-яё]+))?",
    )
    .unwrap()
});

const TIME_UNIT_PREFIXES: &[&str] = &[
    "мин", "час", "сут", "дн", "сек", "min", "hour", "hr", "day", "sec",
];

pub(super) fn match_limit(lower: &str, query: &mut ParsedQuery) {
    for caps in RE_LIMIT.captures_iter(lower) {
        // "last 2 hours" belongs to the time-window stage, not the limit.
        if let Some(next) = caps.get(2) {
            let next = next.as_str();
            if TIME_UNIT_PREFIXES.iter().any(|p| next.starts_with(p)) {
                continue;
            }
        }
        if let Ok(n) = caps[1].parse::<usize>() {
            query.limit = Some(n);
            query.recognize(caps.get(0).map(|m| m.as_str()).unwrap_or(""), "limit");
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// Stage 11: attribute comparisons
// ---------------------------------------------------------------------------

static RE_CMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([a-zа-яё_]+)\s*(>=|<=|!=|>|<|=)\s*([a-zа-яё0-9_.,-]+)").unwrap()
});

/// Surface alias → canonical attribute name. Unmapped identifiers are
/// discarded, not treated as comparisons.
const FIELD_ALIASES: &[(&str, &str)] = &[
    ("speed", "speed"),
    ("скорость", "speed"),
    ("скорост", "speed"),
    ("altitude", "altitude"),
    ("alt", "altitude"),
    ("высота", "altitude"),
    ("threat", "threat_level"),
    ("threat_level", "threat_level"),
    ("угроза", "threat_level"),
    ("confidence", "confidence"),
    ("достоверность", "confidence"),
    ("rssi", "rssi"),
    ("battery", "battery"),
    ("заряд", "battery"),
];

fn canonical_field(surface: &str) -> Option<&'static str> {
    FIELD_ALIASES
        .iter()
        .find(|(alias, _)| *alias == surface)
        .map(|(_, field)| *field)
}

fn parse_op(s: &str) -> Option<CmpOp> {
    Some(match s {
        ">" => CmpOp::Gt,
        ">=" => CmpOp::Ge,
        "<" => CmpOp::Lt,
        "<=" => CmpOp::Le,
        "=" => CmpOp::Eq,
        "!=" => CmpOp::Ne,
        _ => return None,
    })
}

pub(super) fn match_comparisons(lower: &str, query: &mut ParsedQuery) {
    for caps in RE_CMP.captures_iter(lower) {
        let Some(field) = canonical_field(&caps[1]) else {
            continue;
        };
        let Some(op) = parse_op(&caps[2]) else {
            continue;
        };
        let raw = caps[3].trim_end_matches([',', '.']);
        let value = match raw.replace(',', ".").parse::<f64>() {
            Ok(n) => CmpValue::Num(n),
            Err(_) => CmpValue::Text(raw.to_lowercase()),
        };
        query.recognize(caps[0].to_string(), "comparison");
        query.comparisons.push(Comparison {
            field: field.to_string(),
            op,
            value,
        });
    }
}

// ---------------------------------------------------------------------------
// Stage 12: geo filter
// ---------------------------------------------------------------------------

const GEO_VOCAB: &[&str] = &[
    "координат",
    "coordinate",
    "рядом",
    "вблизи",
    "near",
    "радиус",
    "radius",
    "широт",
    "долгот",
    "lat",
    "lon",
    "точк",
];

static RE_GEO_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(-?\d{1,3}\.\d+)\s*,\s*(-?\d{1,3}\.\d+)").unwrap());
static RE_GEO_LAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"lat\s*=\s*(-?\d+(?:\.\d+)?)").unwrap());
static RE_GEO_LON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"lon\s*=\s*(-?\d+(?:\.\d+)?)").unwrap());
static RE_GEO_RADIUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:радиус|radius)\s*[=:]?\s*(\d+(?:[.,]\d+)?)\s*(?:км|km)?").unwrap()
});

/// Only attempted when the query mentions coordinate vocabulary, so a bare
/// "55.75, 37.61" in unrelated text is not misread as a location.
pub(super) fn match_geo(lower: &str, default_radius_km: f64, query: &mut ParsedQuery) {
    if !GEO_VOCAB.iter().any(|w| lower.contains(w)) {
        return;
    }

    let explicit = match (RE_GEO_LAT.captures(lower), RE_GEO_LON.captures(lower)) {
        (Some(lat), Some(lon)) => lat[1]
            .parse::<f64>()
            .ok()
            .zip(lon[1].parse::<f64>().ok()),
        _ => None,
    };
    let pair = RE_GEO_PAIR.captures(lower).and_then(|caps| {
        caps[1]
            .parse::<f64>()
            .ok()
            .zip(caps[2].parse::<f64>().ok())
    });
    let Some((lat, lon)) = explicit.or(pair) else {
        return;
    };

    let radius_km = RE_GEO_RADIUS
        .captures(lower)
        .and_then(|caps| caps[1].replace(',', ".").parse::<f64>().ok())
        .unwrap_or(default_radius_km);

    query.recognize(format!("{lat},{lon} r={radius_km}km"), "geo");
    query.geo = Some(GeoFilter {
        lat,
        lon,
        radius_km,
    });
}
