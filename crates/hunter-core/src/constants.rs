//! Protocol constants. All monetary values in satoshi (1 HUC = 10^8 satoshi).

pub const COIN: i64 = 100_000_000;
pub const CENT: i64 = 1_000_000;
pub const MAX_MONEY: i64 = 21_000_000 * COIN;

/// Whether an amount is a legal transaction-output value.
pub fn money_range(value: i64) -> bool {
    (0..=MAX_MONEY).contains(&value)
}

pub const MAX_BLOCK_SIZE: usize = 1_000_000;
pub const MAX_BLOCK_SIGOPS: usize = 20_000;

/// Blocks a coinbase or game-tx output must age before it can be spent.
pub const COINBASE_MATURITY: i32 = 100;
pub const GAME_REWARD_MATURITY: i32 = 100;

/// Transaction version carrying a name operation.
pub const NAMECOIN_TX_VERSION: i32 = 0x7100;
/// Transaction version of derived game transactions. Never valid on the wire.
pub const GAME_TX_VERSION: i32 = 0x87100;

pub const MAX_NAME_LENGTH: usize = 10;
pub const MAX_VALUE_LENGTH: usize = 4095;
/// Old-style name_firstupdate commitments must be this many blocks deep.
pub const MIN_FIRSTUPDATE_DEPTH: i32 = 2;

/// Coin locked in every registered name output.
pub const NAME_COIN_AMOUNT: i64 = COIN;
/// Minimum coin locked by a name_new commitment. The coin is destroyed if
/// the commitment is never completed.
pub const NAMENEW_COIN_AMOUNT: i64 = NAME_COIN_AMOUNT / 5;

/// Mandatory fee for a name_update, before the per-length component.
pub const NAME_UPDATE_MIN_FEE: i64 = COIN / 100;
/// Additional name_update fee per started 100 bytes of value.
pub const NAME_UPDATE_LEN_FEE: i64 = COIN / 500;

/// Name-index value marking a killed player. A new registration may reuse
/// the name once this marker is the latest entry.
pub const VALUE_DEAD: &[u8] = b"{\"dead\":1}";

/// Tag outputs: OP_RETURN followed by at most this many bytes...
pub const OPRETURN_MAX_STRLEN: usize = 80;
/// ...and locking at least this much (intentionally unspendable).
pub const OPRETURN_MIN_LOCKED: i64 = CENT;

/// Game-state snapshots are persisted at every multiple of this height;
/// intermediate states are recomputed by replay.
pub const KEEP_EVERY_NTH_STATE: i32 = 2000;

/// Premine paid by the mainnet genesis coinbase.
pub const PREMINE_AMOUNT: i64 = 85_000 * COIN;

pub const MAX_FUTURE_BLOCK_TIME: u32 = 2 * 60 * 60;

/// Base relay fee per 1000 bytes.
pub const MIN_TX_FEE: i64 = CENT;
/// Minimum serialized size accepted into the mempool.
pub const MIN_TX_SIZE: usize = 100;

/// Block subsidy plus fees for a given height. The subsidy starts at one
/// coin and halves every 2.1 million blocks; the game distributes nine
/// times the subsidy as treasure, so total emission is ten coins per block.
pub fn get_block_value(height: i32, fees: i64) -> i64 {
    let mut subsidy = COIN;
    subsidy >>= (height / 2_100_000).min(62);
    subsidy + fees
}

/// Chain parameter forks, activated by height.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fork {
    /// Killed players leave poisoned ground.
    Poison,
    /// Direct (one-step) name registration; tighter output rules.
    CarryingCap,
    /// Reduced heart spawns.
    LessHearts,
    /// Locked name amounts may grow over time instead of being fixed.
    LifeSteal,
    /// Reduced on-chain footprint of moves.
    TimeSave,
}

/// Network selection. Carries the per-network consensus parameters.
/// Regtest trivialises proof of work and activates every fork from
/// genesis; it exists for local testing only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn fork_height(self, fork: Fork) -> i32 {
        match self {
            Network::Mainnet => match fork {
                Fork::Poison => 255_000,
                Fork::CarryingCap => 500_000,
                Fork::LessHearts => 590_000,
                Fork::LifeSteal => 795_000,
                Fork::TimeSave => 1_521_500,
            },
            Network::Testnet => match fork {
                Fork::Poison => 190_000,
                Fork::CarryingCap => 200_000,
                Fork::LessHearts => 240_000,
                Fork::LifeSteal => 301_000,
                Fork::TimeSave => 331_500,
            },
            Network::Regtest => 0,
        }
    }

    pub fn fork_in_effect(self, fork: Fork, height: i32) -> bool {
        height >= self.fork_height(fork)
    }

    pub fn p2p_port(self) -> u16 {
        match self {
            Network::Mainnet => 8398,
            Network::Testnet => 18398,
            Network::Regtest => 18498,
        }
    }

    pub fn rpc_port(self) -> u16 {
        match self {
            Network::Mainnet => 8399,
            Network::Testnet => 18399,
            Network::Regtest => 18499,
        }
    }

    /// Base58 version byte for pay-to-pubkey-hash addresses.
    pub fn address_version(self) -> u8 {
        match self {
            Network::Mainnet => 40,
            Network::Testnet | Network::Regtest => 100,
        }
    }

    /// P2P message-start bytes. The last byte differs from the Namecoin
    /// lineage on purpose.
    pub fn message_start(self) -> [u8; 4] {
        match self {
            Network::Mainnet => [0xf9, 0xbe, 0xb4, 0xfe],
            Network::Testnet => [0xfa, 0xbf, 0xb5, 0xfe],
            Network::Regtest => [0xfa, 0xbf, 0xb5, 0xda],
        }
    }
}
