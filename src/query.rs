// =============================================================================
// Query Parser — natural-language trade question to structured query
// =============================================================================
//
// Deterministic extractor over questions like "Can I buy Apple stock
// tomorrow?". Resolution order for the ticker: known company names first,
// then any all-caps token that looks like a symbol. Returns None when no
// ticker can be found; the HTTP layer maps that to PARSE_ERROR.
// =============================================================================

use crate::types::{ParsedQuery, TradeAction};

/// Company-name aliases resolved to tickers. Lowercased keys.
const COMPANY_ALIASES: &[(&str, &str)] = &[
    ("apple", "AAPL"),
    ("tesla", "TSLA"),
    ("microsoft", "MSFT"),
    ("google", "GOOGL"),
    ("alphabet", "GOOGL"),
    ("amazon", "AMZN"),
    ("nvidia", "NVDA"),
    ("meta", "META"),
    ("facebook", "META"),
    ("netflix", "NFLX"),
    ("gamestop", "GME"),
];

/// Words that look like tickers but never are.
const STOPWORDS: &[&str] = &["I", "A", "CAN", "BUY", "SELL", "TRADE", "THE", "OK", "IPO", "CEO"];

/// Parse a free-form trade question. `None` means no ticker was found.
pub fn parse(query: &str) -> Option<ParsedQuery> {
    let ticker = extract_ticker(query)?;

    Some(ParsedQuery {
        ticker,
        action: extract_action(query),
        trade_date: extract_date(query),
    })
}

fn extract_ticker(query: &str) -> Option<String> {
    let lowered = query.to_lowercase();

    for (alias, ticker) in COMPANY_ALIASES {
        if lowered.contains(alias) {
            return Some((*ticker).to_string());
        }
    }

    // Fallback: an all-caps token of 1-5 letters reads as a symbol.
    query
        .split(|c: char| !c.is_ascii_alphanumeric())
        .find(|token| {
            !token.is_empty()
                && token.len() <= 5
                && token.chars().all(|c| c.is_ascii_uppercase())
                && !STOPWORDS.contains(token)
        })
        .map(str::to_string)
}

fn extract_action(query: &str) -> Option<TradeAction> {
    let lowered = query.to_lowercase();
    if lowered.contains("buy") || lowered.contains("purchase") || lowered.contains("acquire") {
        Some(TradeAction::Buy)
    } else if lowered.contains("sell") || lowered.contains("dump") || lowered.contains("unload") {
        Some(TradeAction::Sell)
    } else if lowered.contains("trade") {
        Some(TradeAction::Trade)
    } else {
        None
    }
}

/// Pick out the first YYYY-MM-DD token, if any.
fn extract_date(query: &str) -> Option<String> {
    for token in query.split_whitespace() {
        let token = token.trim_matches(|c: char| !c.is_ascii_digit() && c != '-');
        let bytes = token.as_bytes();
        if token.len() == 10
            && bytes[4] == b'-'
            && bytes[7] == b'-'
            && token
                .chars()
                .enumerate()
                .all(|(i, c)| if i == 4 || i == 7 { c == '-' } else { c.is_ascii_digit() })
        {
            return Some(token.to_string());
        }
    }
    None
}
