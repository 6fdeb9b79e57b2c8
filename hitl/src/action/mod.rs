//! Typed action dispatch.
//!
//! A workflow names a tool and hands over JSON arguments ([`ToolInvocation`]). The closed
//! [`ActionKind`] table maps the name to a tagged [`ProposedAction`]; unknown names are
//! [`GateError::UnrecognizedAction`] and bad arguments are [`GateError::Validation`]. Nothing
//! is dispatched on raw strings after this point.

mod intent;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::approval::{RiskBands, RiskLevel};
use crate::error::GateError;
use crate::policy::ActionClassification;

pub use intent::IntentRouter;

/// The closed set of actions a workflow may request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    GetPortfolio,
    GetQuote,
    ExecuteTrade,
    RebalancePortfolio,
}

impl ActionKind {
    pub const ALL: [ActionKind; 4] = [
        ActionKind::GetPortfolio,
        ActionKind::GetQuote,
        ActionKind::ExecuteTrade,
        ActionKind::RebalancePortfolio,
    ];

    pub fn tool_name(&self) -> &'static str {
        match self {
            ActionKind::GetPortfolio => "get_portfolio",
            ActionKind::GetQuote => "get_quote",
            ActionKind::ExecuteTrade => "execute_trade",
            ActionKind::RebalancePortfolio => "rebalance_portfolio",
        }
    }

    pub fn from_tool_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tool_name() == name)
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, ActionKind::GetPortfolio | ActionKind::GetQuote)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tool_name())
    }
}

/// A named tool call as produced by a workflow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

/// Single-symbol order. Amounts are in KRW.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeOrder {
    pub symbol: String,
    pub side: TradeSide,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notional: Option<u64>,
    #[serde(default)]
    pub sell_all: bool,
}

impl TradeOrder {
    /// Order value: explicit notional, else quantity × price. `None` when unknown.
    pub fn notional(&self) -> Option<u64> {
        self.notional.or_else(|| match (self.quantity, self.price) {
            (Some(q), Some(p)) => q.checked_mul(p),
            _ => None,
        })
    }

    fn validate(&self) -> Result<(), GateError> {
        if self.symbol.trim().is_empty() {
            return Err(GateError::Validation("trade order has no symbol".into()));
        }
        if self.sell_all && self.side != TradeSide::Sell {
            return Err(GateError::Validation("sell_all requires side=sell".into()));
        }
        if !self.sell_all && self.notional.is_none() && self.quantity.is_none() {
            return Err(GateError::Validation(format!(
                "trade order for {} has neither quantity nor notional",
                self.symbol
            )));
        }
        if matches!(self.quantity, Some(0)) || matches!(self.notional, Some(0)) {
            return Err(GateError::Validation("trade amount must be positive".into()));
        }
        if let (Some(q), Some(p)) = (self.quantity, self.price) {
            if q.checked_mul(p).is_none() {
                return Err(GateError::Validation(format!(
                    "order value for {} overflows ({q} × {p})",
                    self.symbol
                )));
            }
        }
        Ok(())
    }
}

/// One leg of a rebalance: positive buys, negative sells.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceLeg {
    pub symbol: String,
    pub delta_notional: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rebalance {
    pub legs: Vec<RebalanceLeg>,
}

impl Rebalance {
    /// Sum of absolute leg deltas.
    pub fn gross_notional(&self) -> Option<u64> {
        self.legs
            .iter()
            .try_fold(0u64, |acc, leg| acc.checked_add(leg.delta_notional.unsigned_abs()))
    }

    pub fn is_multi_leg(&self) -> bool {
        self.legs.len() > 1
    }

    fn validate(&self) -> Result<(), GateError> {
        if self.legs.is_empty() {
            return Err(GateError::Validation("rebalance has no legs".into()));
        }
        for leg in &self.legs {
            if leg.symbol.trim().is_empty() {
                return Err(GateError::Validation("rebalance leg has no symbol".into()));
            }
            if leg.delta_notional == 0 {
                return Err(GateError::Validation(format!(
                    "rebalance leg {} has zero delta",
                    leg.symbol
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct QuoteArgs {
    symbol: String,
}

/// A resolved, typed action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProposedAction {
    GetPortfolio,
    GetQuote { symbol: String },
    ExecuteTrade(TradeOrder),
    RebalancePortfolio(Rebalance),
}

impl ProposedAction {
    /// Resolves a tool call through the dispatch table.
    pub fn from_invocation(invocation: &ToolInvocation) -> Result<Self, GateError> {
        let kind = ActionKind::from_tool_name(&invocation.name)
            .ok_or_else(|| GateError::UnrecognizedAction(invocation.name.clone()))?;
        let args = || {
            if invocation.arguments.is_null() {
                Value::Object(Default::default())
            } else {
                invocation.arguments.clone()
            }
        };
        let invalid = |e: serde_json::Error| {
            GateError::Validation(format!("{} arguments: {e}", invocation.name))
        };
        let action = match kind {
            ActionKind::GetPortfolio => ProposedAction::GetPortfolio,
            ActionKind::GetQuote => {
                let q: QuoteArgs = serde_json::from_value(args()).map_err(invalid)?;
                if q.symbol.trim().is_empty() {
                    return Err(GateError::Validation("quote has no symbol".into()));
                }
                ProposedAction::GetQuote { symbol: q.symbol }
            }
            ActionKind::ExecuteTrade => {
                let order: TradeOrder = serde_json::from_value(args()).map_err(invalid)?;
                order.validate()?;
                ProposedAction::ExecuteTrade(order)
            }
            ActionKind::RebalancePortfolio => {
                let rebalance: Rebalance = serde_json::from_value(args()).map_err(invalid)?;
                rebalance.validate()?;
                ProposedAction::RebalancePortfolio(rebalance)
            }
        };
        Ok(action)
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            ProposedAction::GetPortfolio => ActionKind::GetPortfolio,
            ProposedAction::GetQuote { .. } => ActionKind::GetQuote,
            ProposedAction::ExecuteTrade(_) => ActionKind::ExecuteTrade,
            ProposedAction::RebalancePortfolio(_) => ActionKind::RebalancePortfolio,
        }
    }

    /// KRW magnitude of a mutating action; `None` when read-only or unknown.
    pub fn magnitude(&self) -> Option<u64> {
        match self {
            ProposedAction::ExecuteTrade(order) => order.notional(),
            ProposedAction::RebalancePortfolio(r) => r.gross_notional(),
            _ => None,
        }
    }

    /// Sell-all and multi-leg orders are never low risk.
    pub fn has_risk_floor(&self) -> bool {
        match self {
            ProposedAction::ExecuteTrade(order) => order.sell_all,
            ProposedAction::RebalancePortfolio(r) => r.is_multi_leg(),
            _ => false,
        }
    }

    /// Risk band for a mutating action: magnitude band, unknown magnitude is high,
    /// floored at medium for sell-all and multi-leg. Read-only actions are low.
    pub fn risk_level(&self, bands: &RiskBands) -> RiskLevel {
        if self.kind().is_read_only() {
            return RiskLevel::Low;
        }
        let level = self
            .magnitude()
            .map(|n| bands.band(n))
            .unwrap_or(RiskLevel::High);
        if self.has_risk_floor() {
            level.max(RiskLevel::Medium)
        } else {
            level
        }
    }

    /// Consequence class fed to the policy table.
    pub fn classify(&self, bands: &RiskBands) -> ActionClassification {
        if self.kind().is_read_only() {
            return ActionClassification::ReadOnly;
        }
        if self.has_risk_floor() || self.risk_level(bands) == RiskLevel::High {
            ActionClassification::MutatingHighRisk
        } else {
            ActionClassification::MutatingLowRisk
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bands() -> RiskBands {
        RiskBands::new(5_000_000, 50_000_000).unwrap()
    }

    #[test]
    fn unknown_tool_is_unrecognized_not_ignored() {
        let err = ProposedAction::from_invocation(&ToolInvocation::new("wire_funds", json!({})))
            .unwrap_err();
        assert!(matches!(err, GateError::UnrecognizedAction(name) if name == "wire_funds"));
    }

    #[test]
    fn malformed_trade_arguments_are_validation_errors() {
        let err = ProposedAction::from_invocation(&ToolInvocation::new(
            "execute_trade",
            json!({"symbol": "삼성전자", "side": "hold"}),
        ))
        .unwrap_err();
        assert!(matches!(err, GateError::Validation(_)));

        let err = ProposedAction::from_invocation(&ToolInvocation::new(
            "execute_trade",
            json!({"symbol": "삼성전자", "side": "buy"}),
        ))
        .unwrap_err();
        assert!(matches!(err, GateError::Validation(_)));
    }

    #[test]
    fn overflowing_order_value_is_refused() {
        let err = ProposedAction::from_invocation(&ToolInvocation::new(
            "execute_trade",
            json!({"symbol": "삼성전자", "side": "sell", "quantity": 10, "price": u64::MAX}),
        ))
        .unwrap_err();
        assert!(matches!(err, GateError::Validation(msg) if msg.contains("overflows")));
    }

    #[test]
    fn portfolio_accepts_null_arguments() {
        let action =
            ProposedAction::from_invocation(&ToolInvocation::new("get_portfolio", Value::Null))
                .unwrap();
        assert_eq!(action, ProposedAction::GetPortfolio);
        assert_eq!(action.classify(&bands()), ActionClassification::ReadOnly);
    }

    #[test]
    fn trade_classification_follows_bands() {
        let small = ProposedAction::from_invocation(&ToolInvocation::new(
            "execute_trade",
            json!({"symbol": "카카오", "side": "buy", "notional": 1_000_000}),
        ))
        .unwrap();
        assert_eq!(small.classify(&bands()), ActionClassification::MutatingLowRisk);
        assert_eq!(small.risk_level(&bands()), RiskLevel::Low);

        let big = ProposedAction::from_invocation(&ToolInvocation::new(
            "execute_trade",
            json!({"symbol": "카카오", "side": "buy", "quantity": 1000, "price": 60_000}),
        ))
        .unwrap();
        assert_eq!(big.magnitude(), Some(60_000_000));
        assert_eq!(big.classify(&bands()), ActionClassification::MutatingHighRisk);
    }

    #[test]
    fn unknown_magnitude_and_sell_all_are_high_risk() {
        let no_price = ProposedAction::ExecuteTrade(TradeOrder {
            symbol: "카카오".into(),
            side: TradeSide::Buy,
            quantity: Some(10),
            price: None,
            notional: None,
            sell_all: false,
        });
        assert_eq!(no_price.risk_level(&bands()), RiskLevel::High);
        assert_eq!(
            no_price.classify(&bands()),
            ActionClassification::MutatingHighRisk
        );

        let sell_all = ProposedAction::ExecuteTrade(TradeOrder {
            symbol: "카카오".into(),
            side: TradeSide::Sell,
            quantity: None,
            price: None,
            notional: Some(100_000),
            sell_all: true,
        });
        assert_eq!(sell_all.risk_level(&bands()), RiskLevel::Medium);
        assert_eq!(
            sell_all.classify(&bands()),
            ActionClassification::MutatingHighRisk
        );
    }

    #[test]
    fn multi_leg_rebalance_is_floored() {
        let action = ProposedAction::from_invocation(&ToolInvocation::new(
            "rebalance_portfolio",
            json!({"legs": [
                {"symbol": "삼성전자", "delta_notional": 1_000_000},
                {"symbol": "카카오", "delta_notional": -1_000_000}
            ]}),
        ))
        .unwrap();
        assert_eq!(action.magnitude(), Some(2_000_000));
        assert_eq!(action.risk_level(&bands()), RiskLevel::Medium);
        assert!(action.has_risk_floor());
    }

    #[test]
    fn proposed_action_is_tagged_on_the_wire() {
        let action = ProposedAction::GetQuote {
            symbol: "NAVER".into(),
        };
        let v = serde_json::to_value(&action).unwrap();
        assert_eq!(v, json!({"kind": "get_quote", "symbol": "NAVER"}));
    }
}
