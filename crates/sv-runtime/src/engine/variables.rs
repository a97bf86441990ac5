use super::*;

pub(super) const TIME_VARIABLE: &str = "system_timeNow";
const CLEAR_ALL: &str = "*";

/// Applies one variable-mutation instruction. An `Err` carries the reason the
/// state was left unchanged.
pub(super) fn apply_mutation(state: &mut SessionState, instruction: &Instruction) -> Result<(), String> {
    let kind = &instruction.kind;
    let Some(name) = instruction
        .param("variableName")
        .map(str::trim)
        .filter(|name| !name.is_empty())
    else {
        return Err(format!("{} has no variableName.", kind.name()));
    };

    if name == CLEAR_ALL {
        if *kind != InstructionKind::Clear {
            return Err(format!("{} cannot target every variable.", kind.name()));
        }
        state.variables.clear();
        return Ok(());
    }
    if SessionState::is_reserved_key(name) {
        return Err(format!("\"{}\" belongs to the engine.", name));
    }

    let value = || StateValue::from_param(instruction.param("variableValue").unwrap_or_default());
    let current = state.variable(name).cloned().unwrap_or(StateValue::Null);

    let updated = match kind {
        InstructionKind::Clear => {
            state.remove_variable(name);
            return Ok(());
        }
        InstructionKind::Flag => StateValue::Bool(true),
        InstructionKind::Unflag => StateValue::Bool(false),
        InstructionKind::Set => value(),
        InstructionKind::Increase => {
            let amount = value();
            match numeric(&current).zip(numeric(&amount)) {
                Some((a, b)) => StateValue::Number(a + b),
                None => StateValue::String(format!("{}{}", current.to_text(), amount.to_text())),
            }
        }
        InstructionKind::Reduce
        | InstructionKind::Multiply
        | InstructionKind::Divide
        | InstructionKind::Modulus => arithmetic(kind, name, &current, &value())?,
        InstructionKind::AddToInventory => add_to_inventory(name, current, instruction)?,
        InstructionKind::AddItem => add_item(name, current, instruction)?,
        InstructionKind::RemoveItem => match remove_item(name, current, instruction)? {
            Some(updated) => updated,
            None => return Ok(()),
        },
        InstructionKind::RemoveFirst | InstructionKind::RemoveLast => {
            return remove_end(state, name, current, instruction);
        }
        other => return Err(format!("{} is not a variable mutation.", other.name())),
    };

    state.set_variable(name, updated);
    Ok(())
}

pub(super) fn record_time(state: &mut SessionState, instruction: &Instruction, now_millis: i64) {
    let name = instruction
        .param("variableName")
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(TIME_VARIABLE);
    state.set_variable(name, StateValue::Number(now_millis as f64));
}

fn numeric(value: &StateValue) -> Option<f64> {
    match value {
        StateValue::Array(_) | StateValue::Map(_) => None,
        other => other.as_number(),
    }
}

fn arithmetic(
    kind: &InstructionKind,
    name: &str,
    current: &StateValue,
    operand: &StateValue,
) -> Result<StateValue, String> {
    let (Some(a), Some(b)) = (numeric(current), numeric(operand)) else {
        return Err(format!(
            "{} on \"{}\" needs numbers, got \"{}\" and \"{}\".",
            kind.name(),
            name,
            current.to_text(),
            operand.to_text()
        ));
    };
    let result = match kind {
        InstructionKind::Reduce => a - b,
        InstructionKind::Multiply => a * b,
        InstructionKind::Divide | InstructionKind::Modulus if b == 0.0 => {
            return Err(format!("{} on \"{}\" by zero.", kind.name(), name));
        }
        InstructionKind::Divide => a / b,
        _ => a % b,
    };
    Ok(StateValue::Number(result))
}

fn item_name(instruction: &Instruction) -> Result<String, String> {
    instruction
        .param("itemName")
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .ok_or_else(|| format!("{} has no itemName.", instruction.kind.name()))
}

fn size_cap(instruction: &Instruction) -> Option<usize> {
    instruction
        .param("size")
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|size| *size >= 0.0)
        .map(|size| size as usize)
}

fn add_to_inventory(name: &str, current: StateValue, instruction: &Instruction) -> Result<StateValue, String> {
    let item = item_name(instruction)?;
    let mut counts = match current {
        StateValue::Map(counts) => counts,
        StateValue::Null => BTreeMap::new(),
        other => return Err(format!("\"{}\" holds a {}, not an inventory.", name, other.type_name())),
    };
    let mut count = counts
        .get(&item)
        .and_then(StateValue::as_number)
        .unwrap_or(0.0)
        + 1.0;
    if let Some(cap) = size_cap(instruction) {
        count = count.min(cap as f64);
    }
    counts.insert(item, StateValue::Number(count));
    Ok(StateValue::Map(counts))
}

fn add_item(name: &str, current: StateValue, instruction: &Instruction) -> Result<StateValue, String> {
    let item = item_name(instruction)?;
    let mut items = match current {
        StateValue::Array(items) => items,
        StateValue::Null => Vec::new(),
        other => return Err(format!("\"{}\" holds a {}, not a list.", name, other.type_name())),
    };
    items.push(StateValue::String(item));
    if let Some(cap) = size_cap(instruction) {
        let excess = items.len().saturating_sub(cap);
        items.drain(..excess);
    }
    Ok(StateValue::Array(items))
}

fn remove_item(
    name: &str,
    current: StateValue,
    instruction: &Instruction,
) -> Result<Option<StateValue>, String> {
    let item = item_name(instruction)?;
    match current {
        StateValue::Null => Ok(None),
        StateValue::Map(mut counts) => {
            let remaining = counts
                .get(&item)
                .and_then(StateValue::as_number)
                .unwrap_or(0.0)
                - 1.0;
            if remaining > 0.0 {
                counts.insert(item, StateValue::Number(remaining));
            } else {
                counts.remove(&item);
            }
            Ok(Some(StateValue::Map(counts)))
        }
        StateValue::Array(mut items) => {
            if let Some(position) = items.iter().position(|entry| entry.to_text() == item) {
                items.remove(position);
            }
            Ok(Some(StateValue::Array(items)))
        }
        other => Err(format!("\"{}\" holds a {}, not a collection.", name, other.type_name())),
    }
}

fn remove_end(
    state: &mut SessionState,
    name: &str,
    current: StateValue,
    instruction: &Instruction,
) -> Result<(), String> {
    let mut items = match current {
        StateValue::Array(items) => items,
        StateValue::Null => Vec::new(),
        other => return Err(format!("\"{}\" holds a {}, not a list.", name, other.type_name())),
    };
    let removed = if instruction.kind == InstructionKind::RemoveFirst {
        (!items.is_empty()).then(|| items.remove(0))
    } else {
        items.pop()
    };
    state.set_variable(name, StateValue::Array(items));

    if let Some(save_to) = instruction
        .param("saveTo")
        .map(str::trim)
        .filter(|save_to| !save_to.is_empty())
    {
        match removed {
            Some(value) => {
                state.set_variable(save_to, value);
            }
            None => {
                state.remove_variable(save_to);
            }
        }
    }
    Ok(())
}
