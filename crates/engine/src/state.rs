use std::collections::HashMap;

use tessera_core::{
    EntityRecord, EntityRef, Operation, OperationPayload, PasteMode, SlotRef, Widget, WidgetId,
};

use crate::error::EngineError;

/// Entity records keyed by entity, as the bus holds them.
pub type Records = HashMap<EntityRef, EntityRecord>;

fn record_mut(records: &mut Records, entity: EntityRef) -> Result<&mut EntityRecord, EngineError> {
    records
        .get_mut(&entity)
        .ok_or(EngineError::EntityNotLoaded(entity))
}

fn renumber(widgets: &mut [Widget]) {
    for (position, widget) in widgets.iter_mut().enumerate() {
        widget.order = position as i32;
    }
}

fn insert_widget(
    records: &mut Records,
    at: &SlotRef,
    widget: Widget,
    index: Option<usize>,
) -> Result<(), EngineError> {
    let record = record_mut(records, at.entity)?;
    if record.find_widget(&widget.id).is_some() {
        return Err(EngineError::DuplicateWidget {
            entity: at.entity,
            slot: at.slot.clone(),
            widget: widget.id,
        });
    }
    let slot = record.slot_mut(&at.slot);
    let position = index.unwrap_or(slot.len()).min(slot.len());
    slot.insert(position, widget);
    renumber(slot);
    Ok(())
}

fn take_widget(records: &mut Records, at: &SlotRef, id: &WidgetId) -> Result<Widget, EngineError> {
    let record = record_mut(records, at.entity)?;
    let slot = record.slot_mut(&at.slot);
    let position = slot
        .iter()
        .position(|w| &w.id == id)
        .ok_or_else(|| EngineError::WidgetNotFound {
            entity: at.entity,
            widget: id.clone(),
        })?;
    let widget = slot.remove(position);
    renumber(slot);
    Ok(widget)
}

/// Apply `op` to `records`. On error the records may be partly modified,
/// so callers apply to a scratch copy.
pub fn apply_operation(records: &mut Records, op: &Operation) -> Result<(), EngineError> {
    let target = op.target;
    match &op.payload {
        OperationPayload::AddWidget {
            slot,
            widget,
            index,
        } => {
            let mut widget = widget.clone();
            widget.origin_depth = 0;
            insert_widget(records, &SlotRef::new(target, slot.clone()), widget, *index)
        }
        OperationPayload::RemoveWidget { slot, widget_id } => {
            take_widget(records, &SlotRef::new(target, slot.clone()), widget_id).map(|_| ())
        }
        OperationPayload::MoveWidget {
            widget_id,
            from,
            to,
            index,
        } => {
            let widget = take_widget(records, from, widget_id)?;
            insert_widget(records, to, widget, *index)
        }
        OperationPayload::UpdateWidget {
            slot,
            widget_id,
            config,
        } => {
            let record = record_mut(records, target)?;
            let widget = record
                .slot_mut(slot)
                .iter_mut()
                .find(|w| &w.id == widget_id)
                .ok_or_else(|| EngineError::WidgetNotFound {
                    entity: target,
                    widget: widget_id.clone(),
                })?;
            widget.config = config.clone();
            Ok(())
        }
        OperationPayload::UpdateObjectField { field, value } => {
            let record = record_mut(records, target)?;
            record.fields.insert(field.clone(), value.clone());
            Ok(())
        }
        OperationPayload::PasteWidgets {
            slot,
            widgets,
            mode,
            cut_source,
        } => {
            let at = SlotRef::new(target, slot.clone());
            if *mode == PasteMode::Replace {
                record_mut(records, target)?.slot_mut(slot).clear();
            }
            for widget in widgets {
                let mut widget = widget.clone();
                widget.origin_depth = 0;
                insert_widget(records, &at, widget, None)?;
            }
            // Originals already gone (a second paste of the same cut) are fine.
            if let Some(source) = cut_source {
                let source_record = record_mut(records, source.entity)?;
                let source_slot = source_record.slot_mut(&source.slot);
                source_slot.retain(|w| !source.widget_ids.contains(&w.id));
                renumber(source_slot);
            }
            Ok(())
        }
        OperationPayload::Save => Ok(()),
    }
}

/// Copy the records `op` touches out of `records`, apply it, and return
/// the results target first.
pub fn apply_to_copies(records: &Records, op: &Operation) -> Result<Vec<EntityRecord>, EngineError> {
    let entities = op.affected_entities();
    let mut scratch = Records::with_capacity(entities.len());
    for entity in &entities {
        let record = records
            .get(entity)
            .ok_or(EngineError::EntityNotLoaded(*entity))?;
        scratch.insert(*entity, record.clone());
    }
    apply_operation(&mut scratch, op)?;
    Ok(entities
        .iter()
        .filter_map(|entity| scratch.remove(entity))
        .collect())
}
