//! Rule-based intent routing for Korean trading commands.
//!
//! Deterministic; no model call. Amounts understand `원`, `만원`, `억`, `억원` and combinations
//! such as `1억5000만원`; `10주` is a quantity and `70000원에` a limit price.

use serde_json::{json, Map, Value};

use super::ToolInvocation;
use crate::workflow::WorkflowError;

const BUY: &str = "매수";
const SELL: &str = "매도";
const SELL_ALL: &str = "전량";
const REBALANCE: &str = "리밸런싱";
const PORTFOLIO_WORDS: [&str; 3] = ["포트폴리오", "잔고", "보유"];
const QUOTE_WORDS: [&str; 3] = ["시세", "현재가", "주가"];

/// Words that are never a symbol.
const STOP_WORDS: [&str; 9] = [
    "내", "좀", "해줘", "알려줘", "주문", "전량", "지금", "얼마", "얼마야",
];

/// Turns a free-text message into one [`ToolInvocation`].
#[derive(Clone, Debug, Default)]
pub struct IntentRouter;

impl IntentRouter {
    pub fn new() -> Self {
        Self
    }

    pub fn route(&self, message: &str) -> Result<ToolInvocation, WorkflowError> {
        let text = message.trim();
        if text.is_empty() {
            return Err(WorkflowError::Invalid("empty message".into()));
        }
        if text.contains(REBALANCE) {
            return route_rebalance(text);
        }
        if text.contains(BUY) || text.contains(SELL) {
            return route_trade(text);
        }
        if QUOTE_WORDS.iter().any(|w| text.contains(w)) {
            let symbol = find_symbol(text.split_whitespace())
                .ok_or_else(|| WorkflowError::Invalid("quote request names no symbol".into()))?;
            return Ok(ToolInvocation::new("get_quote", json!({ "symbol": symbol })));
        }
        if PORTFOLIO_WORDS.iter().any(|w| text.contains(w)) {
            return Ok(ToolInvocation::new("get_portfolio", json!({})));
        }
        Err(WorkflowError::Unrecognized(format!(
            "no action matches {text:?}"
        )))
    }
}

fn route_trade(text: &str) -> Result<ToolInvocation, WorkflowError> {
    let side = match (text.contains(BUY), text.contains(SELL)) {
        (true, true) => {
            return Err(WorkflowError::Invalid(
                "message asks to buy and sell at once".into(),
            ))
        }
        (true, false) => "buy",
        _ => "sell",
    };
    let symbol = find_symbol(text.split_whitespace())
        .ok_or_else(|| WorkflowError::Invalid("trade names no symbol".into()))?;

    let mut args = Map::new();
    args.insert("symbol".into(), Value::String(symbol));
    args.insert("side".into(), Value::String(side.into()));

    for token in text.split_whitespace() {
        if let Some(price) = token.strip_suffix('에').and_then(parse_won) {
            args.insert("price".into(), json!(price));
        } else if let Some(qty) = token.strip_suffix('주').and_then(parse_digits) {
            args.insert("quantity".into(), json!(qty));
        } else if let Some(amount) = parse_won(token) {
            args.insert("notional".into(), json!(amount));
        }
    }
    if text.contains(SELL_ALL) {
        if side != "sell" {
            return Err(WorkflowError::Invalid("전량 only applies to 매도".into()));
        }
        args.insert("sell_all".into(), Value::Bool(true));
    }
    Ok(ToolInvocation::new("execute_trade", Value::Object(args)))
}

/// `리밸런싱 삼성전자 +500만원, 카카오 -300만원`
fn route_rebalance(text: &str) -> Result<ToolInvocation, WorkflowError> {
    let mut legs = Vec::new();
    for segment in text.split(',') {
        let tokens: Vec<&str> = segment
            .split_whitespace()
            .filter(|t| !t.contains(REBALANCE))
            .collect();
        let Some(symbol) = find_symbol(tokens.iter().copied()) else {
            continue;
        };
        let Some(delta) = tokens.iter().find_map(|t| parse_signed_won(t)) else {
            return Err(WorkflowError::Invalid(format!(
                "rebalance leg {symbol} has no amount"
            )));
        };
        legs.push(json!({ "symbol": symbol, "delta_notional": delta }));
    }
    if legs.is_empty() {
        return Err(WorkflowError::Invalid(
            "rebalance needs at least one leg".into(),
        ));
    }
    Ok(ToolInvocation::new(
        "rebalance_portfolio",
        json!({ "legs": legs }),
    ))
}

fn find_symbol<'a>(tokens: impl Iterator<Item = &'a str>) -> Option<String> {
    tokens
        .filter(|t| !t.chars().any(|c| c.is_ascii_digit()))
        .filter(|t| !t.contains(BUY) && !t.contains(SELL))
        .filter(|t| !QUOTE_WORDS.iter().any(|w| t.contains(w)))
        .filter(|t| !PORTFOLIO_WORDS.iter().any(|w| t.contains(w)))
        .filter(|t| !STOP_WORDS.contains(t))
        .map(strip_particle)
        .find(|t| !t.is_empty())
        .map(str::to_string)
}

fn strip_particle(token: &str) -> &str {
    for particle in ["의", "를", "을"] {
        if let Some(stem) = token.strip_suffix(particle) {
            if !stem.is_empty() {
                return stem;
            }
        }
    }
    token
}

fn parse_digits(s: &str) -> Option<u64> {
    let cleaned: String = s.chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    cleaned.parse().ok()
}

/// KRW amount; the token must carry a currency or unit suffix.
fn parse_won(token: &str) -> Option<u64> {
    let has_unit = token.ends_with('원') || token.ends_with('억');
    if !has_unit {
        return None;
    }
    let body = token.strip_suffix('원').unwrap_or(token);
    let (eok, rest) = match body.split_once('억') {
        Some((e, r)) => (parse_digits(e)?.checked_mul(100_000_000)?, r),
        None => (0, body),
    };
    let rest = if rest.is_empty() {
        0
    } else if let Some(man) = rest.strip_suffix('만') {
        parse_digits(man)?.checked_mul(10_000)?
    } else {
        parse_digits(rest)?
    };
    eok.checked_add(rest).filter(|n| *n > 0)
}

fn parse_signed_won(token: &str) -> Option<i64> {
    let (sign, body) = match token.chars().next()? {
        '+' => (1, &token[1..]),
        '-' => (-1, &token[1..]),
        _ => (1, token),
    };
    let amount = i64::try_from(parse_won(body)?).ok()?;
    Some(sign * amount)
}
