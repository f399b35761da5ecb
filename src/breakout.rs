//! Breakout Controller (C8): directional market entry with a trailing
//! stop, taken when the Gate reports the market has broken out of
//! contraction.

use std::collections::HashMap;

use crate::config::{Side, Strategy, WorkingType};
use crate::error::VenueError;
use crate::venue::{Exchange, RemotePosition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakoutDirection {
    Long,
    Short,
}

impl BreakoutDirection {
    fn entry_side(self) -> Side {
        match self {
            BreakoutDirection::Long => Side::Buy,
            BreakoutDirection::Short => Side::Sell,
        }
    }

    fn exit_side(self) -> Side {
        self.entry_side().opposite()
    }
}

pub type ActiveBreakouts = HashMap<String, BreakoutDirection>;

pub async fn handle(
    venue: &dyn Exchange,
    symbol: &str,
    strategy: Strategy,
    qty: f64,
    trailing_callback_rate: f64,
    working: WorkingType,
    active: &mut ActiveBreakouts,
) -> Result<(), VenueError> {
    let direction = match strategy {
        Strategy::BreakoutLong => BreakoutDirection::Long,
        Strategy::BreakoutShort => BreakoutDirection::Short,
        _ => return Ok(()),
    };

    if let Some(_existing) = active.get(symbol) {
        let positions = venue.open_positions(symbol).await?;
        if is_flat(&positions) {
            active.remove(symbol);
        }
        return Ok(());
    }

    let entry = venue.place_market(symbol, direction.entry_side(), qty).await?;

    match venue
        .place_trailing_stop(symbol, direction.exit_side(), qty, trailing_callback_rate, working)
        .await
    {
        Ok(_) => {
            active.insert(symbol.to_string(), direction);
        }
        Err(e) => {
            // Trailing stop failed to attach: the position is now
            // unprotected, close it immediately with a compensating
            // market order.
            let _ = venue.place_market(symbol, direction.exit_side(), entry.quantity).await;
            return Err(e);
        }
    }

    Ok(())
}

fn is_flat(positions: &[RemotePosition]) -> bool {
    positions.iter().all(RemotePosition::is_flat)
}
