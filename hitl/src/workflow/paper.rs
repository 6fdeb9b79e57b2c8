//! Paper-trading workflow: rule-based routing and an in-memory position book.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use reasoning_event::{Actor, Phase, Status};
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;

use super::{ExecutionReport, Workflow, WorkflowError};
use crate::action::{IntentRouter, ProposedAction, Rebalance, ToolInvocation, TradeOrder, TradeSide};
use crate::approval::{StaticSymbolResolver, SymbolResolver};
use crate::events::EventRecorder;

#[derive(Clone, Debug, Default, Serialize)]
struct Holding {
    quantity: u64,
    avg_price: u64,
}

#[derive(Clone, Debug, Default, Serialize)]
struct PaperBook {
    cash: u64,
    holdings: BTreeMap<String, Holding>,
}

/// One executed fill.
#[derive(Clone, Debug, Serialize)]
struct Fill {
    ticker: String,
    side: TradeSide,
    quantity: u64,
    price: u64,
}

impl PaperBook {
    /// Applies one fill. Nothing is mutated unless the whole fill fits.
    fn apply(&mut self, fill: &Fill) -> Result<(), WorkflowError> {
        let value = fill
            .quantity
            .checked_mul(fill.price)
            .ok_or_else(|| overflow("order value"))?;
        match fill.side {
            TradeSide::Buy => {
                if value > self.cash {
                    return Err(WorkflowError::Execution(format!(
                        "insufficient cash: need {value}, have {}",
                        self.cash
                    )));
                }
                let (held, avg) = self
                    .holdings
                    .get(&fill.ticker)
                    .map_or((0, 0), |h| (h.quantity, h.avg_price));
                let cost = held
                    .checked_mul(avg)
                    .and_then(|c| c.checked_add(value))
                    .ok_or_else(|| overflow("position cost"))?;
                let quantity = held
                    .checked_add(fill.quantity)
                    .ok_or_else(|| overflow("position size"))?;
                self.cash -= value;
                let h = self.holdings.entry(fill.ticker.clone()).or_default();
                h.quantity = quantity;
                h.avg_price = cost / quantity;
            }
            TradeSide::Sell => {
                let held = self.holdings.get(&fill.ticker).map_or(0, |h| h.quantity);
                if fill.quantity > held {
                    return Err(WorkflowError::Execution(format!(
                        "cannot sell {} of {}: holding {held}",
                        fill.quantity, fill.ticker
                    )));
                }
                self.cash = self
                    .cash
                    .checked_add(value)
                    .ok_or_else(|| overflow("cash balance"))?;
                if fill.quantity == held {
                    self.holdings.remove(&fill.ticker);
                } else if let Some(h) = self.holdings.get_mut(&fill.ticker) {
                    h.quantity -= fill.quantity;
                }
            }
        }
        Ok(())
    }

    fn held(&self, ticker: &str) -> u64 {
        self.holdings.get(ticker).map_or(0, |h| h.quantity)
    }
}

fn overflow(what: &str) -> WorkflowError {
    WorkflowError::Invalid(format!("{what} overflows"))
}

/// [`Workflow`] that routes with [`IntentRouter`] and fills orders against a paper book at
/// static quotes. Multi-leg rebalances apply all legs or none.
pub struct PaperWorkflow {
    router: IntentRouter,
    resolver: Arc<dyn SymbolResolver>,
    quotes: HashMap<String, u64>,
    book: Mutex<PaperBook>,
}

impl PaperWorkflow {
    pub fn new(resolver: Arc<dyn SymbolResolver>, cash: u64) -> Self {
        Self {
            router: IntentRouter::new(),
            resolver,
            quotes: HashMap::new(),
            book: Mutex::new(PaperBook {
                cash,
                holdings: BTreeMap::new(),
            }),
        }
    }

    pub fn with_quote(mut self, ticker: impl Into<String>, price: u64) -> Self {
        self.quotes.insert(ticker.into(), price);
        self
    }

    pub fn with_holding(mut self, ticker: impl Into<String>, quantity: u64, avg_price: u64) -> Self {
        self.book
            .get_mut()
            .holdings
            .insert(ticker.into(), Holding { quantity, avg_price });
        self
    }

    /// ₩100,000,000 cash, 100 shares of 삼성전자, quotes for the default KRX table.
    pub fn krx_demo() -> Self {
        Self::new(Arc::new(StaticSymbolResolver::krx_defaults()), 100_000_000)
            .with_quote("005930", 70_000)
            .with_quote("000660", 180_000)
            .with_quote("035420", 200_000)
            .with_quote("035720", 45_000)
            .with_quote("005380", 250_000)
            .with_quote("373220", 400_000)
            .with_holding("005930", 100, 65_000)
    }

    fn ticker(&self, symbol: &str) -> Result<String, WorkflowError> {
        self.resolver
            .resolve(symbol)
            .ok_or_else(|| WorkflowError::Invalid(format!("unknown symbol {symbol:?}")))
    }

    fn quote(&self, ticker: &str) -> Result<u64, WorkflowError> {
        self.quotes
            .get(ticker)
            .copied()
            .ok_or_else(|| WorkflowError::Execution(format!("no quote for {ticker}")))
    }

    fn plan_order(&self, order: &TradeOrder, book: &PaperBook) -> Result<Fill, WorkflowError> {
        let ticker = self.ticker(&order.symbol)?;
        let price = match order.price {
            Some(p) => p,
            None => self.quote(&ticker)?,
        };
        let quantity = if order.sell_all {
            book.held(&ticker)
        } else if let Some(q) = order.quantity {
            q
        } else {
            order.notional.unwrap_or(0) / price.max(1)
        };
        if quantity == 0 {
            return Err(WorkflowError::Execution(format!(
                "order for {} rounds to zero shares",
                order.symbol
            )));
        }
        Ok(Fill {
            ticker,
            side: order.side,
            quantity,
            price,
        })
    }

    fn plan_rebalance(
        &self,
        rebalance: &Rebalance,
        book: &PaperBook,
    ) -> Result<Vec<Fill>, WorkflowError> {
        let mut fills = Vec::with_capacity(rebalance.legs.len());
        for leg in &rebalance.legs {
            let ticker = self.ticker(&leg.symbol)?;
            let price = self.quote(&ticker)?;
            let shares = leg.delta_notional.unsigned_abs() / price.max(1);
            let (side, quantity) = if leg.delta_notional > 0 {
                (TradeSide::Buy, shares)
            } else {
                (TradeSide::Sell, shares.min(book.held(&ticker)))
            };
            if quantity > 0 {
                fills.push(Fill {
                    ticker,
                    side,
                    quantity,
                    price,
                });
            }
        }
        Ok(fills)
    }
}

#[async_trait]
impl Workflow for PaperWorkflow {
    async fn route(
        &self,
        message: &str,
        recorder: &EventRecorder,
    ) -> Result<ToolInvocation, WorkflowError> {
        let invocation = self.router.route(message)?;
        recorder
            .record(
                recorder
                    .with_agent("intent_router")
                    .draft(Phase::Routing, Status::Progress, Actor::Agent)
                    .with_message("intent parsed")
                    .with_meta("tool", invocation.name.clone()),
            )
            .await;
        Ok(invocation)
    }

    async fn execute(
        &self,
        action: &ProposedAction,
        recorder: &EventRecorder,
    ) -> Result<ExecutionReport, WorkflowError> {
        let recorder = recorder.with_agent("paper_trader");
        let mut book = self.book.lock().await;
        let report = match action {
            ProposedAction::GetPortfolio => ExecutionReport {
                message: format!(
                    "cash ₩{}, {} position(s)",
                    book.cash,
                    book.holdings.len()
                ),
                data: json!(&*book),
            },
            ProposedAction::GetQuote { symbol } => {
                let ticker = self.ticker(symbol)?;
                let price = self.quote(&ticker)?;
                ExecutionReport {
                    message: format!("{symbol} ({ticker}) ₩{price}"),
                    data: json!({ "symbol": symbol, "ticker": ticker, "price": price }),
                }
            }
            ProposedAction::ExecuteTrade(order) => {
                let fill = self.plan_order(order, &book)?;
                book.apply(&fill)?;
                ExecutionReport {
                    message: format!(
                        "{} {} × {} @ ₩{}",
                        fill.side.as_str(),
                        order.symbol,
                        fill.quantity,
                        fill.price
                    ),
                    data: json!({ "fills": [fill], "cash": book.cash }),
                }
            }
            ProposedAction::RebalancePortfolio(rebalance) => {
                let fills = self.plan_rebalance(rebalance, &book)?;
                let mut staged = book.clone();
                for fill in &fills {
                    staged.apply(fill)?;
                }
                *book = staged;
                ExecutionReport {
                    message: format!("rebalanced with {} fill(s)", fills.len()),
                    data: json!({ "fills": fills, "cash": book.cash }),
                }
            }
        };
        drop(book);
        recorder
            .emit(
                Phase::Execution,
                Status::Progress,
                Actor::Agent,
                report.message.clone(),
            )
            .await;
        Ok(report)
    }
}
