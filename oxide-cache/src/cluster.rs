//! Redis Cluster helpers
//!
//! This module provides:
//! - Slot calculation using CRC16
//! - Grouping of keys by slot so multi-key commands never cross slots
//! - Parsing of `CLUSTER NODES` into node records

use crc16::*;
use oxide_cache_core::{
    error::{CacheError, CacheResult},
    types::{NodeAddress, NodeInfo, SlotRange},
};
use std::collections::BTreeMap;

/// Total number of hash slots in Redis Cluster
pub const CLUSTER_SLOTS: u16 = 16384;

/// Calculate the hash slot for a given key
///
/// This implements the Redis Cluster key hashing algorithm:
/// - If the key contains {...}, only the part between the first { and first } is hashed
/// - Otherwise, the entire key is hashed
/// - The hash is CRC16 mod 16384
pub fn calculate_slot(key: &[u8]) -> u16 {
    let hash_key = extract_hash_tag(key);
    State::<XMODEM>::calculate(hash_key) % CLUSTER_SLOTS
}

/// Extract the hash tag from a key
///
/// Hash tags allow you to ensure multiple keys are allocated to the same hash slot.
/// For example: `{user1000}.following` and `{user1000}.followers` will hash to the same slot.
fn extract_hash_tag(key: &[u8]) -> &[u8] {
    if let Some(start) = key.iter().position(|&b| b == b'{') {
        if let Some(end) = key[start + 1..].iter().position(|&b| b == b'}') {
            let end = start + 1 + end;
            // empty tags hash the whole key
            if end > start + 1 {
                return &key[start + 1..end];
            }
        }
    }
    key
}

/// Group key positions by hash slot
///
/// Positions keep their relative order inside each group, so replies of a
/// per-slot multi-key command can be mapped back to the input.
pub fn group_by_slot<K: AsRef<str>>(keys: &[K]) -> BTreeMap<u16, Vec<usize>> {
    let mut groups: BTreeMap<u16, Vec<usize>> = BTreeMap::new();
    for (index, key) in keys.iter().enumerate() {
        groups
            .entry(calculate_slot(key.as_ref().as_bytes()))
            .or_default()
            .push(index);
    }
    groups
}

/// Parse a `CLUSTER NODES` reply
///
/// Each line reads `<id> <ip:port@cport[,hostname]> <flags> <master> <ping-sent>
/// <pong-recv> <config-epoch> <link-state> <slot> <slot> ...`. Nodes flagged
/// `fail` or `noaddr`, or without a usable address, are marked failing.
pub fn parse_cluster_nodes(reply: &str) -> CacheResult<Vec<NodeInfo>> {
    let mut nodes = Vec::new();

    for line in reply.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 8 {
            return Err(CacheError::Command(format!(
                "malformed CLUSTER NODES line: '{line}'"
            )));
        }

        let flags: Vec<&str> = fields[2].split(',').collect();
        let address = fields[1]
            .split(['@', ','])
            .next()
            .and_then(|addr| addr.parse::<NodeAddress>().ok())
            .filter(|addr| addr.port != 0);

        let is_failing =
            address.is_none() || flags.iter().any(|flag| matches!(*flag, "fail" | "noaddr"));
        let address = address.unwrap_or_else(|| NodeAddress::new(String::new(), 0));

        let mut node = NodeInfo::new(fields[0].to_string(), address);
        node.is_primary = flags.contains(&"master");
        node.is_failing = is_failing;
        node.slots = fields[8..].iter().filter_map(|s| parse_slot_range(s)).collect();
        nodes.push(node);
    }

    Ok(nodes)
}

/// Reachable primaries from a `CLUSTER NODES` reply
pub fn healthy_primaries(nodes: Vec<NodeInfo>) -> Vec<NodeInfo> {
    nodes
        .into_iter()
        .filter(|node| node.is_primary && !node.is_failing)
        .collect()
}

fn parse_slot_range(field: &str) -> Option<SlotRange> {
    // importing/migrating markers look like [slot->-id]
    if field.starts_with('[') {
        return None;
    }
    match field.split_once('-') {
        Some((start, end)) => Some(SlotRange::new(start.parse().ok()?, end.parse().ok()?)),
        None => {
            let slot = field.parse().ok()?;
            Some(SlotRange::new(slot, slot))
        }
    }
}
