//! Pot arithmetic. Integer sompi throughout: the house cut floors, survivors
//! split the remainder evenly, and any indivisible sompi go to the first
//! survivor in turn order.

use crate::error::{GameError, GameResult};
use crate::models::Room;
use crate::services::chain::TxOutput;
use crate::utils::percent_of;

#[derive(Debug, Clone)]
pub struct PayoutPlan {
    /// Survivor outputs first (turn order), then the treasury cut if any.
    pub outputs: Vec<TxOutput>,
    pub pot: u64,
    pub house_cut: u64,
}

/// Builds the payout for a concluded room: pot = seat price x confirmed
/// seats, house cut floored, the rest split across surviving seats.
pub fn payout_plan(room: &Room, treasury_address: &str) -> GameResult<PayoutPlan> {
    let survivors = room.alive_in_order();
    if survivors.is_empty() {
        return Err(GameError::invariant("payout with no surviving seats"));
    }
    let pot = room.pot();
    let house_cut = percent_of(pot, room.house_cut_percent);
    let pool = pot - house_cut;
    let share = pool / survivors.len() as u64;
    let remainder = pool % survivors.len() as u64;

    let mut outputs = Vec::with_capacity(survivors.len() + 1);
    for (pos, seat_index) in survivors.iter().enumerate() {
        let wallet = room.seats[*seat_index]
            .wallet_address
            .clone()
            .ok_or_else(|| GameError::invariant("surviving seat has no wallet"))?;
        let amount = if pos == 0 { share + remainder } else { share };
        outputs.push(TxOutput {
            address: wallet,
            amount,
        });
    }
    if house_cut > 0 {
        outputs.push(TxOutput {
            address: treasury_address.to_string(),
            amount: house_cut,
        });
    }
    Ok(PayoutPlan {
        outputs,
        pot,
        house_cut,
    })
}

/// Refunds for an aborted room: each confirmed seat gets back exactly the
/// amount observed at its deposit address. Unconfirmed seats are owed
/// nothing.
pub fn refund_plan(room: &Room) -> Vec<TxOutput> {
    room.seats
        .iter()
        .filter(|s| s.confirmed)
        .filter_map(|s| {
            s.wallet_address.as_ref().map(|wallet| TxOutput {
                address: wallet.clone(),
                amount: s.amount,
            })
        })
        .collect()
}
