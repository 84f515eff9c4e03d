//! RPC-read `OracleClient` implementations for the on-chain protocols
//! (Chainlink, API3, RedStone, Flux, Switchboard).

mod onchain;

pub use onchain::{connect, OnchainOracleClient};
