//! Decoded per-chain transactions as handed over by the transaction store
//!
//! Message payloads are a tagged enum so that each leg kind carries exactly the
//! fields it has on chain, with typed accessors for the packet they reference.

use serde::{Deserialize, Serialize};

pub const WRITE_ACK_EVENT: &str = "write_acknowledgement";
pub const PACKET_ACK_ATTR: &str = "packet_ack";

/// Marker substring that classifies an acknowledgement as an error
const ACK_ERROR_MARKER: &str = "error";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: String,
}

impl Coin {
    pub fn new(denom: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            denom: denom.into(),
            amount: amount.into(),
        }
    }

    /// Amount as an integer; malformed amounts count as zero
    pub fn amount_u128(&self) -> u128 {
        self.amount.trim().parse().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fee {
    pub amount: Vec<Coin>,
    #[serde(default)]
    pub gas_limit: u64,
}

/// ICS-20 packet payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FungibleTokenPacketData {
    /// Full trace path on the sending chain, e.g. `transfer/channel-0/uatom`
    pub denom: String,
    pub amount: String,
    pub sender: String,
    pub receiver: String,
    #[serde(default)]
    pub memo: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub sequence: u64,
    pub source_port: String,
    pub source_channel: String,
    pub destination_port: String,
    pub destination_channel: String,
    pub data: FungibleTokenPacketData,
    #[serde(default)]
    pub timeout_timestamp: u64,
}

impl Packet {
    /// Identifier shared by every leg of the same packet
    pub fn packet_id(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.source_port,
            self.source_channel,
            self.destination_port,
            self.destination_channel,
            self.sequence
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMsg {
    pub token: Coin,
    pub sender: String,
    pub receiver: String,
    /// Packet emitted by the send, decoded from its `send_packet` event
    pub packet: Packet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecvPacketMsg {
    pub packet: Packet,
    pub signer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcknowledgementMsg {
    pub packet: Packet,
    pub acknowledgement: String,
    pub signer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutMsg {
    pub packet: Packet,
    pub next_sequence_recv: u64,
    pub signer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    Transfer,
    RecvPacket,
    Acknowledgement,
    Timeout,
}

impl MsgType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MsgType::Transfer => "transfer",
            MsgType::RecvPacket => "recv_packet",
            MsgType::Acknowledgement => "acknowledgement",
            MsgType::Timeout => "timeout",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "transfer" => Some(MsgType::Transfer),
            "recv_packet" => Some(MsgType::RecvPacket),
            "acknowledgement" => Some(MsgType::Acknowledgement),
            "timeout" => Some(MsgType::Timeout),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TxMsg {
    Transfer(TransferMsg),
    RecvPacket(RecvPacketMsg),
    Acknowledgement(AcknowledgementMsg),
    Timeout(TimeoutMsg),
    Other { type_url: String },
}

impl TxMsg {
    pub fn msg_type(&self) -> Option<MsgType> {
        match self {
            TxMsg::Transfer(_) => Some(MsgType::Transfer),
            TxMsg::RecvPacket(_) => Some(MsgType::RecvPacket),
            TxMsg::Acknowledgement(_) => Some(MsgType::Acknowledgement),
            TxMsg::Timeout(_) => Some(MsgType::Timeout),
            TxMsg::Other { .. } => None,
        }
    }

    pub fn packet(&self) -> Option<&Packet> {
        match self {
            TxMsg::Transfer(m) => Some(&m.packet),
            TxMsg::RecvPacket(m) => Some(&m.packet),
            TxMsg::Acknowledgement(m) => Some(&m.packet),
            TxMsg::Timeout(m) => Some(&m.packet),
            TxMsg::Other { .. } => None,
        }
    }

    pub fn packet_id(&self) -> Option<String> {
        self.packet().map(Packet::packet_id)
    }

    pub fn as_transfer(&self) -> Option<&TransferMsg> {
        match self {
            TxMsg::Transfer(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_acknowledgement(&self) -> Option<&AcknowledgementMsg> {
        match self {
            TxMsg::Acknowledgement(m) => Some(m),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    pub attributes: Vec<EventAttribute>,
}

impl Event {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }
}

/// Events emitted while executing the message at `msg_index`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgEvents {
    pub msg_index: usize,
    pub events: Vec<Event>,
}

/// Acknowledgement written by the destination chain for a received packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    Success(String),
    Error(String),
}

impl AckOutcome {
    pub fn classify(payload: &str) -> Self {
        if payload.contains(ACK_ERROR_MARKER) {
            AckOutcome::Error(payload.to_string())
        } else {
            AckOutcome::Success(payload.to_string())
        }
    }

    pub fn payload(&self) -> &str {
        match self {
            AckOutcome::Success(p) | AckOutcome::Error(p) => p,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AckOutcome::Success(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTx {
    pub chain_id: String,
    pub tx_hash: String,
    pub height: i64,
    /// Block time, unix seconds
    pub time: i64,
    /// On-chain result code, 0 = success
    pub code: u32,
    pub fee: Fee,
    #[serde(default)]
    pub memo: String,
    #[serde(default)]
    pub signers: Vec<String>,
    pub msgs: Vec<TxMsg>,
    #[serde(default)]
    pub events: Vec<MsgEvents>,
}

impl ChainTx {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    /// Index and message of every message touching `packet_id` with the given type
    pub fn msgs_for_packet<'a>(
        &'a self,
        msg_type: MsgType,
        packet_id: &'a str,
    ) -> impl Iterator<Item = (usize, &'a TxMsg)> + 'a {
        self.msgs.iter().enumerate().filter(move |(_, m)| {
            m.msg_type() == Some(msg_type) && m.packet_id().as_deref() == Some(packet_id)
        })
    }

    /// `packet_ack` attribute of the `write_acknowledgement` event emitted by message `msg_index`
    pub fn write_acknowledgement(&self, msg_index: usize) -> Option<&str> {
        self.events
            .iter()
            .filter(|e| e.msg_index == msg_index)
            .flat_map(|e| e.events.iter())
            .filter(|e| e.kind == WRITE_ACK_EVENT)
            .find_map(|e| e.attribute(PACKET_ACK_ATTR))
    }

    /// Acknowledgement written when receiving `packet_id`, with the receiving message index
    pub fn ack_for_packet(&self, packet_id: &str) -> Option<(usize, AckOutcome)> {
        self.msgs_for_packet(MsgType::RecvPacket, packet_id)
            .find_map(|(idx, _)| {
                self.write_acknowledgement(idx)
                    .map(|payload| (idx, AckOutcome::classify(payload)))
            })
    }

    /// Whether this tx relays the source-side acknowledgement of `packet_id` with exactly `payload`
    pub fn acknowledges(&self, packet_id: &str, payload: &str) -> Option<usize> {
        self.msgs_for_packet(MsgType::Acknowledgement, packet_id)
            .find(|(_, m)| {
                m.as_acknowledgement()
                    .map(|ack| ack.acknowledgement == payload)
                    .unwrap_or(false)
            })
            .map(|(idx, _)| idx)
    }

    pub fn first_msg_index(&self, msg_type: MsgType, packet_id: &str) -> Option<usize> {
        self.msgs_for_packet(msg_type, packet_id).map(|(idx, _)| idx).next()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_ack_classification() {
        assert!(AckOutcome::classify(r#"{"result":"AQ=="}"#).is_success());
        assert!(!AckOutcome::classify(r#"{"error":"insufficient funds"}"#).is_success());
    }

    #[test]
    fn test_write_ack_matched_by_msg_index() {
        let p1 = packet(1, "uatom");
        let p2 = packet(2, "uatom");
        let mut recv = tx(
            "osmosis-1",
            "RECV",
            10,
            vec![
                TxMsg::RecvPacket(RecvPacketMsg { packet: p1.clone(), signer: "relayer".into() }),
                TxMsg::RecvPacket(RecvPacketMsg { packet: p2.clone(), signer: "relayer".into() }),
            ],
        );
        recv.events.push(write_ack_events(1, r#"{"error":"bad"}"#));

        assert!(recv.ack_for_packet(&p1.packet_id()).is_none());
        let (idx, ack) = recv.ack_for_packet(&p2.packet_id()).unwrap();
        assert_eq!(idx, 1);
        assert!(!ack.is_success());
    }

    #[test]
    fn test_acknowledges_requires_identical_payload() {
        let p = packet(7, "uatom");
        let ack_tx = tx(
            "cosmoshub-4",
            "ACK",
            20,
            vec![TxMsg::Acknowledgement(AcknowledgementMsg {
                packet: p.clone(),
                acknowledgement: r#"{"result":"AQ=="}"#.into(),
                signer: "relayer".into(),
            })],
        );

        assert_eq!(ack_tx.acknowledges(&p.packet_id(), r#"{"result":"AQ=="}"#), Some(0));
        assert_eq!(ack_tx.acknowledges(&p.packet_id(), r#"{"result":"AQ"}"#), None);
    }

    #[test]
    fn test_msg_serialization_is_tagged() {
        let msg = TxMsg::Other { type_url: "/cosmos.bank.v1beta1.MsgSend".into() };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "other");
        assert_eq!(msg.msg_type(), None);
    }
}
