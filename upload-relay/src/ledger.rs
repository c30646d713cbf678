/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::collections::BTreeMap;

use crate::error::{self, Error};
use crate::types::{PartNumber, PartRecord, SessionId};

/// Reference to an accepted part, as given by the caller when completing an upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartSelector {
    /// The part to include
    pub part_number: PartNumber,
    /// When present it must match the ETag recorded when the part was accepted
    pub e_tag: Option<String>,
}

impl From<PartNumber> for PartSelector {
    fn from(part_number: PartNumber) -> Self {
        Self {
            part_number,
            e_tag: None,
        }
    }
}

/// Part counts of one session at a point in time
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PartCounts {
    /// Parts accepted by the provider
    pub accepted: usize,
    /// Parts whose provider request has not finished
    pub in_flight: usize,
    /// Bytes of all accepted and in-flight parts
    pub bytes: u64,
}

#[derive(Clone, Debug)]
enum PartSlot {
    /// Reserved by an `AcceptPart` call whose provider request has not finished yet
    InFlight { size_bytes: u64 },
    Accepted(PartRecord),
}

impl PartSlot {
    fn size_bytes(&self) -> u64 {
        match self {
            PartSlot::InFlight { size_bytes } => *size_bytes,
            PartSlot::Accepted(record) => record.size_bytes,
        }
    }
}

/// Tracks the parts of a single upload session.
///
/// A part number is claimed with [`reserve`](Self::reserve) before the payload is sent to the
/// provider and then either [`record`](Self::record)ed or [`release`](Self::release)d. A number
/// that is reserved or recorded can not be claimed again, which is what makes duplicate
/// submissions fail even when they race each other.
#[derive(Debug)]
pub struct PartLedger {
    session_id: SessionId,
    slots: BTreeMap<PartNumber, PartSlot>,
}

impl PartLedger {
    /// Create an empty ledger for `session_id`
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            slots: BTreeMap::new(),
        }
    }

    /// Claim `part_number` for a payload of `size_bytes`.
    ///
    /// Parts smaller than `min_part_size` are only allowed while they could still be the last
    /// part, i.e. no higher part number has been claimed.
    pub fn reserve(
        &mut self,
        part_number: PartNumber,
        size_bytes: u64,
        min_part_size: u64,
    ) -> Result<(), Error> {
        if self.slots.contains_key(&part_number) {
            return Err(error::duplicate_part(&self.session_id, part_number));
        }
        if size_bytes < min_part_size {
            if let Some((highest, _)) = self.slots.last_key_value() {
                if *highest > part_number {
                    return Err(error::payload_too_small(format!(
                        "part {part_number} is {size_bytes} bytes, below the minimum of \
                         {min_part_size} bytes, and part {highest} already follows it"
                    )));
                }
            }
        }
        self.slots
            .insert(part_number, PartSlot::InFlight { size_bytes });
        Ok(())
    }

    /// Turn a reservation into an accepted part.
    pub fn record(&mut self, part_number: PartNumber, e_tag: String) -> Result<PartRecord, Error> {
        let slot = self.slots.get_mut(&part_number).ok_or_else(|| {
            error::invalid_state(format!(
                "part {part_number} of session {} was never reserved",
                self.session_id
            ))
        })?;
        match slot {
            PartSlot::InFlight { size_bytes } => {
                let record = PartRecord {
                    session_id: self.session_id.clone(),
                    part_number,
                    e_tag,
                    size_bytes: *size_bytes,
                };
                *slot = PartSlot::Accepted(record.clone());
                Ok(record)
            }
            PartSlot::Accepted(_) => Err(error::duplicate_part(&self.session_id, part_number)),
        }
    }

    /// Drop a reservation that did not make it to the provider. Accepted parts are kept.
    pub fn release(&mut self, part_number: PartNumber) {
        if let Some(PartSlot::InFlight { .. }) = self.slots.get(&part_number) {
            self.slots.remove(&part_number);
        }
    }

    /// Look up an accepted part
    pub fn get(&self, part_number: PartNumber) -> Option<&PartRecord> {
        match self.slots.get(&part_number) {
            Some(PartSlot::Accepted(record)) => Some(record),
            _ => None,
        }
    }

    /// All accepted parts in ascending part number order
    pub fn accepted(&self) -> impl Iterator<Item = &PartRecord> {
        self.slots.values().filter_map(|slot| match slot {
            PartSlot::Accepted(record) => Some(record),
            PartSlot::InFlight { .. } => None,
        })
    }

    /// Number of parts with a provider request still in flight
    fn in_flight(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, PartSlot::InFlight { .. }))
            .count()
    }

    /// Total bytes of all claimed parts
    fn total_bytes(&self) -> u64 {
        self.slots.values().map(PartSlot::size_bytes).sum()
    }

    /// Accepted and in-flight part counts
    pub fn counts(&self) -> PartCounts {
        let in_flight = self.in_flight();
        PartCounts {
            accepted: self.slots.len() - in_flight,
            in_flight,
            bytes: self.total_bytes(),
        }
    }

    /// Resolve the parts selected for completion, ordered by ascending part number.
    ///
    /// Fails with `IncompleteUpload` if the selection is empty, names a part that was not
    /// accepted, carries a mismatched ETag, or includes a part under `min_part_size` that
    /// is not the last one. Repeating a part number is an `InvalidArgument`.
    pub fn select(
        &self,
        selection: &[PartSelector],
        min_part_size: u64,
    ) -> Result<Vec<PartRecord>, Error> {
        if selection.is_empty() {
            return Err(error::incomplete_upload(format!(
                "no parts given to complete session {}",
                self.session_id
            )));
        }

        let mut parts = Vec::with_capacity(selection.len());
        for selector in selection {
            let record = self.get(selector.part_number).ok_or_else(|| {
                error::incomplete_upload(format!(
                    "part {} has not been accepted for session {}",
                    selector.part_number, self.session_id
                ))
            })?;
            if let Some(e_tag) = &selector.e_tag {
                if e_tag != &record.e_tag {
                    return Err(error::incomplete_upload(format!(
                        "part {} ETag {e_tag} does not match accepted ETag {}",
                        selector.part_number, record.e_tag
                    )));
                }
            }
            parts.push(record.clone());
        }

        // parts must be sorted
        parts.sort_by_key(|p| p.part_number);
        if let Some(w) = parts.windows(2).find(|w| w[0].part_number == w[1].part_number) {
            return Err(error::invalid_argument(format!(
                "part {} listed more than once",
                w[0].part_number
            )));
        }

        let last = parts.len() - 1;
        if let Some((_, small)) = parts
            .iter()
            .enumerate()
            .find(|(i, p)| *i != last && p.size_bytes < min_part_size)
        {
            return Err(error::incomplete_upload(format!(
                "part {} is {} bytes, only the last part may be smaller than {} bytes",
                small.part_number, small.size_bytes, min_part_size
            )));
        }

        Ok(parts)
    }
}
