/// Cargo ledger for caravans: capacity checks, line merging and loss selection.
use super::errors::CaravanError;
use super::types::{CaravanRecord, CargoLine, ItemRecord};

// ============================================================================
// Ledger Operations
// ============================================================================

/// Total snapshotted value across all lines
pub fn total_value(lines: &[CargoLine]) -> i64 {
    lines.iter().map(CargoLine::value).sum()
}

/// Quantity of an item currently carried
pub fn cargo_quantity(lines: &[CargoLine], item_id: &str) -> u32 {
    lines
        .iter()
        .find(|line| line.item_id == item_id)
        .map(|line| line.quantity)
        .unwrap_or(0)
}

/// Check that `quantity` more units fit in the caravan
pub fn check_capacity(caravan: &CaravanRecord, quantity: u32) -> Result<(), CaravanError> {
    let loaded = caravan.total_items();
    match loaded.checked_add(quantity) {
        Some(total) if total <= caravan.capacity => Ok(()),
        _ => Err(CaravanError::CapacityExceeded {
            capacity: caravan.capacity,
            loaded,
            requested: quantity,
        }),
    }
}

/// Merge `quantity` units of `item` into the ledger.
///
/// A new line snapshots the item's current market value; an existing line keeps the
/// value it was first loaded at.
pub fn load_line(lines: &mut Vec<CargoLine>, item: &ItemRecord, quantity: u32) {
    if let Some(line) = lines.iter_mut().find(|line| line.item_id == item.id) {
        line.quantity += quantity;
        return;
    }
    lines.push(CargoLine::new(&item.id, &item.name, quantity, item.unit_value));
}

/// Take `quantity` units of an item out of the ledger, dropping the line when emptied.
/// Returns the unloaded portion.
pub fn unload_line(
    lines: &mut Vec<CargoLine>,
    item_id: &str,
    quantity: u32,
) -> Result<CargoLine, CaravanError> {
    let available = cargo_quantity(lines, item_id);
    let Some(index) = lines.iter().position(|line| line.item_id == item_id) else {
        return Err(CaravanError::InsufficientCargo {
            item_id: item_id.to_string(),
            requested: quantity,
            available,
        });
    };
    if available < quantity {
        return Err(CaravanError::InsufficientCargo {
            item_id: item_id.to_string(),
            requested: quantity,
            available,
        });
    }

    let mut unloaded = lines[index].clone();
    unloaded.quantity = quantity;
    if available == quantity {
        lines.remove(index);
    } else {
        lines[index].quantity -= quantity;
    }
    Ok(unloaded)
}

/// `fraction` of `value`, rounded half away from zero.
pub fn portion(value: i64, fraction: f64) -> i64 {
    (value as f64 * fraction).round() as i64
}

/// Remove `target` gold worth of cargo, or all of it when the cargo is worth less.
///
/// Whole units go first: lines are visited from the highest unit value down (ties keep
/// ledger order) and each gives up `min(quantity, remaining / unit_value)` units. A
/// residual smaller than every surviving unit is cut from one unit of the cheapest
/// surviving line. That unit stays aboard at its reduced value and the cut is reported
/// as a single unit worth the residual. Returns the removed lines in visiting order.
pub fn take_value(lines: &mut Vec<CargoLine>, target: i64) -> Vec<CargoLine> {
    let mut removed = Vec::new();
    if target <= 0 {
        return removed;
    }

    let mut order: Vec<usize> = (0..lines.len()).collect();
    order.sort_by(|a, b| lines[*b].unit_value.cmp(&lines[*a].unit_value));

    let mut remaining = target;
    for index in order {
        if remaining <= 0 {
            break;
        }
        let line = &mut lines[index];
        if line.unit_value <= 0 {
            continue;
        }
        let affordable = (remaining / line.unit_value).min(line.quantity as i64) as u32;
        if affordable == 0 {
            continue;
        }
        line.quantity -= affordable;
        remaining -= affordable as i64 * line.unit_value;
        removed.push(CargoLine::new(
            &line.item_id,
            &line.item_name,
            affordable,
            line.unit_value,
        ));
    }

    if remaining > 0 {
        let cheapest = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line.quantity > 0 && line.unit_value > remaining)
            .min_by_key(|(_, line)| line.unit_value)
            .map(|(index, _)| index);
        if let Some(index) = cheapest {
            let line = &lines[index];
            removed.push(CargoLine::new(&line.item_id, &line.item_name, 1, remaining));
            let damaged = CargoLine::new(
                &line.item_id,
                &line.item_name,
                1,
                line.unit_value - remaining,
            );
            if line.quantity == 1 {
                lines[index] = damaged;
            } else {
                lines[index].quantity -= 1;
                lines.insert(index + 1, damaged);
            }
        }
    }

    lines.retain(|line| line.quantity > 0);
    removed
}

/// Format a caravan's cargo for display
pub fn format_manifest(caravan: &CaravanRecord) -> Vec<String> {
    if caravan.cargo.is_empty() {
        return vec!["Empty".to_string()];
    }

    let mut lines = Vec::new();
    for (idx, line) in caravan.cargo.iter().enumerate() {
        lines.push(format!(
            "{}. {}x {} @ {}g = {}g",
            idx + 1,
            line.quantity,
            line.item_name,
            line.unit_value,
            line.value()
        ));
    }
    lines.push(format!(
        "Total: {}/{} items, {}g",
        caravan.total_items(),
        caravan.capacity,
        caravan.cargo_value()
    ));
    lines
}

// ============================================================================
// Unit Tests
// ============================================================================
