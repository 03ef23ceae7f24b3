//! Protocol constants for the masternode quorum layer.

use rusty_shared_types::COIN;

/// Protocol version spoken by this implementation.
pub const PROTOCOL_VERSION: u32 = 70040;

/// Amount a collateral output must hold, in base units.
pub const MASTERNODE_COLLATERAL_AMOUNT: u64 = 10_000 * COIN;

// --- Registry timing ---

/// Confirmations a collateral output needs before its masternode is accepted.
pub const MASTERNODE_MIN_CONFIRMATIONS: u64 = 15;
/// Minimum spacing between pings of one masternode, and between asks for one entry.
pub const MASTERNODE_MIN_MNP_SECONDS: u64 = 10 * 60;
/// Minimum spacing between accepted announces of one masternode.
pub const MASTERNODE_MIN_MNB_SECONDS: u64 = 5 * 60;
/// How often a running masternode pings.
pub const MASTERNODE_PING_SECONDS: u64 = 5 * 60;
/// Without a ping for this long a masternode is expired.
pub const MASTERNODE_EXPIRATION_SECONDS: u64 = 65 * 60;
/// Without a ping for this long a masternode is removed.
pub const MASTERNODE_REMOVAL_SECONDS: u64 = 75 * 60;
/// Throttle for per-record state checks.
pub const MASTERNODE_CHECK_SECONDS: u64 = 5;
/// A peer may ask us for the full list once in this window (main network only).
pub const MASTERNODES_DSEG_SECONDS: u64 = 3 * 60 * 60;
/// Tolerated distance between a signing timestamp and local adjusted time.
pub const MAX_CLOCK_DRIFT_SECONDS: u64 = 60 * 60;
/// Pings anchor this many blocks behind the tip.
pub const PING_ANCHOR_DEPTH: u64 = 12;
/// Pings anchored further behind the tip than this are ignored.
pub const PING_MAX_ANCHOR_AGE_BLOCKS: u64 = 24;
/// Default port of the main network. Other networks must not use it.
pub const MAINNET_DEFAULT_PORT: u16 = 9340;

// --- Payment voting ---

pub const MNPAYMENTS_SIGNATURES_REQUIRED: u32 = 6;
pub const MNPAYMENTS_SIGNATURES_TOTAL: usize = 10;
/// Output index of the masternode payment in a coinbase.
pub const MN_PMT_SLOT: usize = 1;
/// Voters are ranked this many blocks before the height they vote for.
pub const PAYMENT_RANK_OFFSET: u64 = 100;
/// Votes may target at most this many blocks past the tip.
pub const PAYMENT_FUTURE_WINDOW: u64 = 20;
/// A payee already winning within this many blocks of the tip is not picked again.
pub const PAYMENT_SCHEDULE_WINDOW: u64 = 8;
/// The local masternode votes for the block this far past the new tip.
pub const PAYMENT_VOTE_LOOKAHEAD: u64 = 10;
/// Tallies are kept for at least this many blocks.
pub const PAYMENT_MIN_RETAINED_BLOCKS: u64 = 1000;
/// Votes a payee needs in a past tally to count as paid.
pub const PAYMENT_PAID_VOTES: u32 = 2;
pub const REFERENCE_NODE_VOTE_WEIGHT: u32 = 100;
pub const MIN_MASTERNODE_PAYMENT_PROTO_VERSION_CURR: u32 = 70040;
pub const MIN_MASTERNODE_PAYMENT_PROTO_VERSION_PREV: u32 = 70020;
/// Unpaid masternodes are treated as last paid at least this long ago.
pub const SECONDS_PER_MONTH: u64 = 60 * 60 * 24 * 30;
/// Spread applied to the block time of a masternode's last payment.
pub const LAST_PAID_OFFSET_MODULUS: u64 = 150;

// --- Instant lock ---

pub const INSTANTX_SIGNATURES_REQUIRED: usize = 6;
pub const INSTANTX_SIGNATURES_TOTAL: usize = 10;
pub const MIN_INSTANTX_PROTO_VERSION: u32 = 70040;
/// Confirmations every input of a lock request needs.
pub const INSTANTX_MIN_INPUT_CONFIRMATIONS: u64 = 5;
/// Lock height is projected this many blocks past the youngest input.
pub const INSTANTX_LOCK_HEIGHT_OFFSET: u64 = 4;
/// Requests and votes for transactions mined deeper than this are ignored.
pub const INSTANTX_ACCEPTED_BLOCK_COUNT: u64 = 24;
pub const INSTANTX_EXPIRATION_SECONDS: u64 = 60 * 24;
pub const INSTANTX_TIMEOUT_SECONDS: u64 = 60 * 5;
/// Blocks reprocessed after a lock is voided or completes for a rejected request.
pub const INSTANTX_REPROCESS_DEPTH: u64 = 15;
pub const INSTANTX_DEFAULT_MAX_VALUE_COINS: u64 = 1000;
/// Smallest fee a lockable transaction must pay.
pub const INSTANTX_MIN_FEE: u64 = COIN / 100;
/// Window in which a voter may send votes for transactions we have not seen.
pub const UNKNOWN_VOTE_WINDOW_SECONDS: u64 = 60 * 10;

// --- Sync ---

/// An item counts as synced once no new data arrived for this long.
pub const SYNC_TIMEOUT_SECONDS: u64 = 30;

// --- Misbehavior scores ---

pub const DOS_FUTURE_TIMESTAMP: u32 = 1;
pub const DOS_BAD_KEY_SIZE: u32 = 100;
pub const DOS_COLLATERAL_MISMATCH: u32 = 33;
pub const DOS_BAD_PING_SIGNATURE: u32 = 33;
pub const DOS_LIST_REQUEST_SPAM: u32 = 34;
pub const DOS_PAYMENT_VOTE: u32 = 20;
