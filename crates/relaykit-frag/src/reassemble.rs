//! The reassembly packet handler and the TTL sweep for abandoned groups.

use async_trait::async_trait;
use bytes::BytesMut;

use relaykit_core::label::{FRAGMENT_FIRST, FRAGMENT_REST};
use relaykit_core::{Counter, EndpointId, Packet};
use relaykit_store::{FragmentGroup, LocalEndpoint, PacketHandler, Result, StoreError};

use crate::wire::{FirstFragment, RestFragment};

/// Packet handler that stages fragments and delivers the reconstructed
/// packet once its group is complete.
///
/// Register it before user handlers so a logical packet surfaces during
/// the same `put_packet` call that completed its group. Non-fragment
/// labels pass through untouched.
pub struct Reassembler;

#[async_trait]
impl PacketHandler for Reassembler {
    async fn on_packet(&self, endpoint: &dyn LocalEndpoint, packet: &Packet) -> Result<()> {
        match packet.label {
            FRAGMENT_FIRST => {
                endpoint.stash_packet(packet).await?;
                endpoint
                    .touch_fragment_group(&packet.src, &packet.seq, &packet.seq)
                    .await?;
                try_assemble(endpoint, &packet.src, &packet.seq).await
            }
            FRAGMENT_REST => {
                let rest = RestFragment::decode(&packet.payload)?;
                endpoint.stash_packet(packet).await?;
                endpoint
                    .touch_fragment_group(&packet.src, &rest.group, &packet.seq)
                    .await?;
                try_assemble(endpoint, &packet.src, &rest.group).await
            }
            _ => Ok(()),
        }
    }
}

/// Deliver the group rooted at `group` if every piece has arrived.
///
/// The group owns the counter range [`group`, `group + count`], so
/// completeness is a plain count over that range. Checking on every
/// arrival makes assembly independent of delivery order.
async fn try_assemble(
    endpoint: &dyn LocalEndpoint,
    src: &EndpointId,
    group: &Counter,
) -> Result<()> {
    let own = endpoint.name().clone();
    let Some(first) = endpoint.get_packet(src, &own, group).await? else {
        // First packet still in flight; the chunk count is unknown.
        return Ok(());
    };
    let header = FirstFragment::decode(&first.payload)?;
    let last = group.add(u64::from(header.count));
    let have = endpoint
        .count_packets_in_range(src, &own, group, &last, FRAGMENT_REST)
        .await?;

    if have > u64::from(header.count) {
        return Err(StoreError::InvalidData(format!(
            "fragment group {group} holds {have} continuation packets, expected {}",
            header.count
        )));
    }
    if have < u64::from(header.count) {
        return Ok(());
    }

    let parts = endpoint
        .packets_in_range(src, &own, group, &last, FRAGMENT_REST)
        .await?;
    let mut payload = BytesMut::new();
    for part in &parts {
        let rest = RestFragment::decode(&part.payload)?;
        if rest.group != *group {
            return Err(StoreError::InvalidData(format!(
                "fragment {} in range of group {group} names group {}",
                part.seq, rest.group
            )));
        }
        payload.extend_from_slice(&rest.chunk);
    }

    let logical = Packet {
        src: src.clone(),
        dst: own.clone(),
        seq: group.clone(),
        label: header.label,
        payload: payload.freeze(),
    };
    tracing::debug!(
        "reassembled {} chunks from {} into label {} packet {}",
        header.count,
        src,
        header.label,
        group
    );
    endpoint.deliver(&logical).await?;
    endpoint.remove_packets_in_range(src, &own, group, &last).await?;
    endpoint.clear_fragment_group(src, group).await?;
    Ok(())
}

/// Drop staged groups whose newest fragment is older than `max_age_ms`,
/// reclaiming their packets. Returns the swept rows.
///
/// Nothing schedules this; callers run it on their own cadence.
pub async fn expire_groups(
    endpoint: &dyn LocalEndpoint,
    max_age_ms: u64,
) -> Result<Vec<FragmentGroup>> {
    let cutoff = relaykit_core::now_millis().saturating_sub(max_age_ms);
    let stale = endpoint.stale_fragment_groups(cutoff).await?;
    for group in &stale {
        endpoint
            .remove_packets_in_range(&group.src, &group.dst, &group.group, &group.last_seq)
            .await?;
        endpoint.clear_fragment_group(&group.src, &group.group).await?;
        tracing::info!(
            "expired fragment group {} from {} after {}ms of silence",
            group.group,
            group.src,
            max_age_ms
        );
    }
    Ok(stale)
}
