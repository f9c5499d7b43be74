//! Splitting of uplink MAC-command blobs into individual commands.

use super::FrameError;

/// Payload length of an uplink (device to server) MAC command.
///
/// Proprietary identifiers (`0x80..=0xff`) have no known length and return
/// `None`; they consume the remainder of the blob.
fn uplink_payload_len(cid: u8) -> Result<Option<usize>, FrameError> {
    let len = match cid {
        0x02 | 0x04 | 0x08 => 0, // LinkCheckReq, DutyCycleAns, RXTimingSetupAns
        0x03 | 0x05 | 0x07 => 1, // LinkADRAns, RXParamSetupAns, NewChannelAns
        0x06 => 2,               // DevStatusAns
        0x80..=0xff => return Ok(None),
        other => return Err(FrameError::UnknownMacCommand(other)),
    };
    Ok(Some(len))
}

/// Split a blob of uplink MAC commands (FOpts or a decrypted port-0
/// FRMPayload) into one byte vector per command, CID included.
///
/// # Errors
///
/// Returns [`FrameError::UnknownMacCommand`] for an unassigned identifier and
/// [`FrameError::TruncatedMacCommand`] when a command is cut short.
pub fn split_uplink_commands(mut blob: &[u8]) -> Result<Vec<Vec<u8>>, FrameError> {
    let mut commands = Vec::new();
    while let Some((&cid, rest)) = blob.split_first() {
        let Some(len) = uplink_payload_len(cid)? else {
            commands.push(blob.to_vec());
            break;
        };
        if rest.len() < len {
            return Err(FrameError::TruncatedMacCommand { cid });
        }
        let (command, tail) = blob.split_at(1 + len);
        commands.push(command.to_vec());
        blob = tail;
    }
    Ok(commands)
}
