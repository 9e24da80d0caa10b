//! Fixed domain vocabulary shared by keyword retrieval, constraint
//! narrowing and theme labelling.

pub struct Market {
    pub key: &'static str,
    pub terms: &'static [&'static str],
}

pub const MARKETS: &[Market] = &[
    Market {
        key: "nova",
        terms: &[
            "northern virginia",
            "n. virginia",
            "loudoun",
            "ashburn",
            "sterling",
            "prince william",
            "manassas",
            "virginia",
        ],
    },
    Market {
        key: "dfw",
        terms: &["dallas", "fort worth", "north texas", "texas"],
    },
    Market {
        key: "phoenix",
        terms: &["phoenix", "mesa", "tempe", "goodyear", "arizona"],
    },
    Market {
        key: "atlanta",
        terms: &["atlanta", "douglas county", "georgia"],
    },
    Market {
        key: "chicago",
        terms: &["chicago", "elk grove", "illinois"],
    },
    Market {
        key: "ohio",
        terms: &["ohio", "columbus", "new albany"],
    },
    Market {
        key: "ny",
        terms: &["new york", "new jersey", "northern new jersey"],
    },
    Market {
        key: "silicon valley",
        terms: &["silicon valley", "santa clara", "san jose"],
    },
    Market {
        key: "portland",
        terms: &["portland", "hillsboro", "oregon"],
    },
    Market {
        key: "las vegas",
        terms: &["las vegas", "reno", "nevada"],
    },
];

/// Query token -> extra terms searched alongside it.
pub const TOPIC_SYNONYMS: &[(&str, &[&str])] = &[
    ("power", &["grid", "substation", "interconnect", "utility", "electricity"]),
    ("grid", &["power", "utility", "substation"]),
    ("cooling", &["liquid", "immersion", "chiller", "thermal"]),
    ("permit", &["permitting", "zoning", "entitlement", "moratorium"]),
    ("permitting", &["permit", "zoning", "entitlement", "moratorium"]),
    ("zoning", &["rezoning", "permit", "entitlement"]),
    ("land", &["acre", "acres", "site", "parcel"]),
    ("colocation", &["colo", "multi-tenant", "wholesale"]),
    ("colo", &["colocation"]),
    ("hyperscale", &["hyperscaler", "campus"]),
    ("ai", &["gpu", "inference", "training"]),
    ("deal", &["acquisition", "acquires", "financing", "investment"]),
    ("deals", &["acquisition", "acquires", "financing", "investment"]),
    ("lease", &["leasing", "pre-lease", "absorption"]),
    ("leasing", &["lease", "pre-lease", "absorption"]),
];

/// Capacity units: any listed token in the query pulls in the whole group.
pub const UNIT_GROUPS: &[&[&str]] = &[
    &["mw", "megawatt", "megawatts"],
    &["gw", "gigawatt", "gigawatts"],
    &["kw", "kilowatt", "kilowatts"],
];

/// Phrases that mark a title as squarely on-topic.
pub const DOMAIN_SIGNALS: &[&str] = &[
    "data center",
    "data centre",
    "datacenter",
    "colocation",
    "hyperscale",
    "campus",
];

pub const STOPWORDS: &[&str] = &[
    "a", "about", "all", "an", "and", "any", "are", "as", "at", "be", "been", "by", "can",
    "could", "did", "do", "does", "for", "from", "get", "give", "has", "have", "how", "i", "in",
    "into", "is", "it", "its", "latest", "me", "more", "most", "new", "news", "of", "on", "or",
    "our", "please", "recent", "should", "show", "tell", "than", "that", "the", "their", "there",
    "these", "this", "those", "to", "up", "update", "updates", "us", "was", "we", "were", "what",
    "whats", "when", "where", "which", "who", "why", "will", "with", "would", "you", "your",
];

/// Theme label -> keywords, in tie-break order.
pub const THEMES: &[(&str, &[&str])] = &[
    (
        "Cooling",
        &["cooling", "liquid", "immersion", "chiller", "thermal", "heat"],
    ),
    (
        "Power & grid",
        &["power", "grid", "substation", "utility", "megawatt", "mw", "energy", "nuclear", "gas"],
    ),
    (
        "Deals & capital",
        &["acquisition", "acquires", "deal", "financing", "investment", "funding", "billion", "raises", "joint venture"],
    ),
    (
        "Permitting & policy",
        &["permit", "zoning", "rezoning", "moratorium", "county", "board", "regulation", "policy", "tax"],
    ),
    (
        "Markets & site selection",
        &["land", "acre", "site", "campus", "market", "parcel", "expansion", "region"],
    ),
    (
        "Demand",
        &["demand", "ai", "gpu", "hyperscaler", "leasing", "lease", "absorption", "capacity"],
    ),
];

pub const GENERAL_THEME: &str = "General";

/// Lowercases and replaces every non-alphanumeric char with a space, padded.
pub fn normalize_for_match(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push(' ');
    let mut last_space = true;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    if !last_space {
        out.push(' ');
    }
    out
}

/// Whole-word (or whole-phrase) match against `normalize_for_match` output.
pub fn contains_term(normalized: &str, term: &str) -> bool {
    let needle = normalize_for_match(term);
    if needle.trim().is_empty() {
        return false;
    }
    normalized.contains(&needle)
}

/// Markets mentioned by key or by any of their terms.
pub fn detect_markets(text: &str) -> Vec<&'static Market> {
    let normalized = normalize_for_match(text);
    MARKETS
        .iter()
        .filter(|market| {
            contains_term(&normalized, market.key)
                || market.terms.iter().any(|t| contains_term(&normalized, t))
        })
        .collect()
}

/// Unit groups mentioned in the text (e.g. "MW" or "megawatts").
pub fn detect_units(text: &str) -> Vec<&'static [&'static str]> {
    let normalized = normalize_for_match(text);
    let mut groups: Vec<&'static [&'static str]> = UNIT_GROUPS
        .iter()
        .copied()
        .filter(|group| group.iter().any(|t| contains_term(&normalized, t)))
        .collect();
    // "100MW" tokenizes as one word.
    for group in UNIT_GROUPS {
        let unit = group[0];
        let glued = normalized.split_whitespace().any(|word| {
            word.len() > unit.len()
                && word.ends_with(unit)
                && word[..word.len() - unit.len()]
                    .chars()
                    .all(|c| c.is_ascii_digit())
        });
        if glued && !groups.contains(group) {
            groups.push(*group);
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_matching_respects_word_boundaries() {
        let text = normalize_for_match("Gallons of water used in Ashburn, VA.");
        assert!(contains_term(&text, "ashburn"));
        assert!(contains_term(&text, "Water used"));
        assert!(!contains_term(&text, "ga"));
    }

    #[test]
    fn markets_detected_by_key_or_term() {
        let keys: Vec<&str> = detect_markets("Loudoun County rezoning").iter().map(|m| m.key).collect();
        assert_eq!(keys, vec!["nova"]);
        let keys: Vec<&str> = detect_markets("what is happening in DFW").iter().map(|m| m.key).collect();
        assert_eq!(keys, vec!["dfw"]);
        assert!(detect_markets("liquid cooling trends").is_empty());
    }

    #[test]
    fn units_detected_including_glued_numbers() {
        assert_eq!(detect_units("campuses over 100 MW").len(), 1);
        assert_eq!(detect_units("a 300MW campus").len(), 1);
        assert!(detect_units("numbers only 300").is_empty());
    }
}
