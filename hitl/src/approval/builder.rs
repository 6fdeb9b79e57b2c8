//! Builds [`ApprovalRequest`]s from proposed actions.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use super::{ApprovalRequest, ApprovalStatus, ApprovalType, RiskBands};
use crate::action::{ProposedAction, TradeOrder};
use crate::error::GateError;

/// Maps a user-facing name to an exchange ticker.
pub trait SymbolResolver: Send + Sync {
    /// `None` when the name is not a known listing.
    fn resolve(&self, name: &str) -> Option<String>;
}

/// Table-backed resolver. Six-digit codes resolve to themselves.
#[derive(Clone, Debug, Default)]
pub struct StaticSymbolResolver {
    table: HashMap<String, String>,
}

impl StaticSymbolResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, ticker: impl Into<String>) -> Self {
        self.table.insert(name.into(), ticker.into());
        self
    }

    /// A handful of large KRX listings.
    pub fn krx_defaults() -> Self {
        Self::new()
            .with("삼성전자", "005930")
            .with("SK하이닉스", "000660")
            .with("네이버", "035420")
            .with("NAVER", "035420")
            .with("카카오", "035720")
            .with("현대차", "005380")
            .with("LG에너지솔루션", "373220")
    }
}

impl SymbolResolver for StaticSymbolResolver {
    fn resolve(&self, name: &str) -> Option<String> {
        let name = name.trim();
        if name.len() == 6 && name.chars().all(|c| c.is_ascii_digit()) {
            return Some(name.to_string());
        }
        self.table.get(name).cloned()
    }
}

/// Builds immutable, risk-scored approval requests.
#[derive(Clone)]
pub struct ApprovalRequestBuilder {
    bands: RiskBands,
    resolver: Arc<dyn SymbolResolver>,
}

impl ApprovalRequestBuilder {
    pub fn new(bands: RiskBands, resolver: Arc<dyn SymbolResolver>) -> Self {
        Self { bands, resolver }
    }

    pub fn bands(&self) -> &RiskBands {
        &self.bands
    }

    fn ticker(&self, symbol: &str) -> Result<String, GateError> {
        self.resolver
            .resolve(symbol)
            .ok_or_else(|| GateError::Validation(format!("unresolved ticker symbol {symbol:?}")))
    }

    /// Fails with [`GateError::Validation`] when a symbol does not resolve.
    pub fn build(&self, action: &ProposedAction) -> Result<ApprovalRequest, GateError> {
        let mut fields = BTreeMap::new();
        fields.insert("action".to_string(), json!(action.kind().tool_name()));
        let approval_type = match action {
            ProposedAction::ExecuteTrade(order) => {
                self.trade_fields(order, &mut fields)?;
                ApprovalType::TradeExecution
            }
            ProposedAction::RebalancePortfolio(rebalance) => {
                let mut legs = Vec::with_capacity(rebalance.legs.len());
                for leg in &rebalance.legs {
                    legs.push(json!({
                        "symbol": leg.symbol,
                        "ticker": self.ticker(&leg.symbol)?,
                        "delta_notional": leg.delta_notional,
                    }));
                }
                fields.insert("legs".into(), Value::Array(legs));
                fields.insert("leg_count".into(), json!(rebalance.legs.len()));
                if let Some(gross) = rebalance.gross_notional() {
                    fields.insert("gross_notional".into(), json!(gross));
                }
                ApprovalType::PortfolioRebalance
            }
            ProposedAction::GetQuote { symbol } => {
                fields.insert("symbol".into(), json!(symbol));
                fields.insert("ticker".into(), json!(self.ticker(symbol)?));
                ApprovalType::InformationRequest
            }
            ProposedAction::GetPortfolio => ApprovalType::InformationRequest,
        };
        Ok(ApprovalRequest {
            id: uuid::Uuid::new_v4().to_string(),
            approval_type,
            risk_level: action.risk_level(&self.bands),
            fields,
            created_at: Utc::now(),
            status: ApprovalStatus::Pending,
        })
    }

    fn trade_fields(
        &self,
        order: &TradeOrder,
        fields: &mut BTreeMap<String, Value>,
    ) -> Result<(), GateError> {
        fields.insert("symbol".into(), json!(order.symbol));
        fields.insert("ticker".into(), json!(self.ticker(&order.symbol)?));
        fields.insert("side".into(), json!(order.side.as_str()));
        if let Some(q) = order.quantity {
            fields.insert("quantity".into(), json!(q));
        }
        if let Some(p) = order.price {
            fields.insert("price".into(), json!(p));
        }
        if let Some(n) = order.notional() {
            fields.insert("notional".into(), json!(n));
        }
        if order.sell_all {
            fields.insert("sell_all".into(), json!(true));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Rebalance, RebalanceLeg, TradeSide};
    use crate::approval::RiskLevel;

    fn builder() -> ApprovalRequestBuilder {
        ApprovalRequestBuilder::new(
            RiskBands::default(),
            Arc::new(StaticSymbolResolver::krx_defaults()),
        )
    }

    fn buy(symbol: &str, notional: u64) -> ProposedAction {
        ProposedAction::ExecuteTrade(TradeOrder {
            symbol: symbol.into(),
            side: TradeSide::Buy,
            quantity: None,
            price: None,
            notional: Some(notional),
            sell_all: false,
        })
    }

    /// **Scenario**: ₩10,000,000 buy under 5M/50M bands is a medium-risk trade_execution.
    #[test]
    fn samsung_ten_million_is_medium() {
        let req = builder().build(&buy("삼성전자", 10_000_000)).unwrap();
        assert_eq!(req.approval_type, ApprovalType::TradeExecution);
        assert_eq!(req.risk_level, RiskLevel::Medium);
        assert_eq!(req.status, ApprovalStatus::Pending);
        assert_eq!(req.fields["ticker"], json!("005930"));
        assert_eq!(req.fields["notional"], json!(10_000_000));
    }

    #[test]
    fn risk_is_deterministic() {
        let a = builder().build(&buy("카카오", 60_000_000)).unwrap();
        let b = builder().build(&buy("카카오", 60_000_000)).unwrap();
        assert_eq!(a.risk_level, b.risk_level);
        assert_eq!(a.fields, b.fields);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn unresolved_symbol_is_validation_error() {
        let err = builder().build(&buy("없는회사", 1_000)).unwrap_err();
        assert!(matches!(err, GateError::Validation(_)));
    }

    #[test]
    fn six_digit_codes_resolve() {
        let req = builder().build(&buy("000660", 1_000)).unwrap();
        assert_eq!(req.fields["ticker"], json!("000660"));
        assert_eq!(req.risk_level, RiskLevel::Low);
    }

    #[test]
    fn rebalance_lists_resolved_legs() {
        let action = ProposedAction::RebalancePortfolio(Rebalance {
            legs: vec![
                RebalanceLeg {
                    symbol: "삼성전자".into(),
                    delta_notional: 1_000_000,
                },
                RebalanceLeg {
                    symbol: "카카오".into(),
                    delta_notional: -2_000_000,
                },
            ],
        });
        let req = builder().build(&action).unwrap();
        assert_eq!(req.approval_type, ApprovalType::PortfolioRebalance);
        assert_eq!(req.risk_level, RiskLevel::Medium);
        assert_eq!(req.fields["leg_count"], json!(2));
        assert_eq!(req.fields["legs"][1]["ticker"], json!("035720"));
    }
}
