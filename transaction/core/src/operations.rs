// Copyright (c) 2024 The Morphene Developers

//! The operation catalog.
//!
//! Tags follow the Steem lineage the chain descends from. Adding an
//! operation means adding one entry below; the field order given here is
//! the wire order.

use std::collections::BTreeSet;

use mph_crypto_keys::PublicKey;
use serde_json::Value;

use crate::{
    json::ChainJson,
    types::{AccountName, Asset, Authority, ChainProperties, Price, TimePointSec},
    WireError,
};

define_operations! {
    /// Up- or down-vote a post. `weight` is in basis points, -10000..=10000.
    0 => "vote": Vote {
        voter: AccountName,
        author: AccountName,
        permlink: String,
        weight: i16,
    }

    /// Create or edit a post or reply.
    1 => "comment": Comment {
        parent_author: AccountName,
        parent_permlink: String,
        author: AccountName,
        permlink: String,
        title: String,
        body: String,
        json_metadata: String,
    }

    /// Move liquid tokens between accounts.
    2 => "transfer": Transfer {
        from: AccountName,
        to: AccountName,
        amount: Asset,
        memo: String,
    }

    /// Power up: convert liquid tokens into vesting shares.
    3 => "transfer_to_vesting": TransferToVesting {
        from: AccountName,
        to: AccountName,
        amount: Asset,
    }

    /// Start (or with zero, stop) a power down.
    4 => "withdraw_vesting": WithdrawVesting {
        account: AccountName,
        vesting_shares: Asset,
    }

    5 => "limit_order_create": LimitOrderCreate {
        owner: AccountName,
        orderid: u32,
        amount_to_sell: Asset,
        min_to_receive: Asset,
        fill_or_kill: bool,
        expiration: TimePointSec,
    }

    6 => "limit_order_cancel": LimitOrderCancel {
        owner: AccountName,
        orderid: u32,
    }

    /// A witness price feed.
    7 => "feed_publish": FeedPublish {
        publisher: AccountName,
        exchange_rate: Price,
    }

    8 => "convert": Convert {
        owner: AccountName,
        requestid: u32,
        amount: Asset,
    }

    /// Register a new account, paying `fee` from `creator`.
    9 => "account_create": AccountCreate {
        fee: Asset,
        creator: AccountName,
        new_account_name: AccountName,
        owner: Authority,
        active: Authority,
        posting: Authority,
        memo_key: PublicKey,
        json_metadata: String,
    }

    /// Replace some of an account's authorities. Absent ones are unchanged.
    10 => "account_update": AccountUpdate {
        account: AccountName,
        owner: Option<Authority>,
        active: Option<Authority>,
        posting: Option<Authority>,
        memo_key: PublicKey,
        json_metadata: String,
    }

    11 => "witness_update": WitnessUpdate {
        owner: AccountName,
        url: String,
        block_signing_key: PublicKey,
        props: ChainProperties,
        fee: Asset,
    }

    12 => "account_witness_vote": AccountWitnessVote {
        account: AccountName,
        witness: AccountName,
        approve: bool,
    }

    /// Delegate witness voting to `proxy`; an empty proxy clears it.
    13 => "account_witness_proxy": AccountWitnessProxy {
        account: AccountName,
        proxy: AccountName,
    }

    17 => "delete_comment": DeleteComment {
        author: AccountName,
        permlink: String,
    }

    /// Application data signed by the listed accounts.
    18 => "custom_json": CustomJson {
        required_auths: BTreeSet<AccountName>,
        required_posting_auths: BTreeSet<AccountName>,
        id: String,
        json: String,
    }

    20 => "set_withdraw_vesting_route": SetWithdrawVestingRoute {
        from_account: AccountName,
        to_account: AccountName,
        percent: u16,
        auto_vest: bool,
    }
}

impl ChainJson for Operation {
    /// `[name, {fields}]`, the condenser form.
    fn to_chain_json(&self, prefix: &str) -> Value {
        Value::Array(vec![Value::String(self.name().to_string()), self.body_to_json(prefix)])
    }

    /// Accepts the condenser form and the `{type, value}` form newer APIs
    /// return, where `type` carries an `_operation` suffix.
    fn from_chain_json(value: &Value, prefix: &str) -> Result<Self, WireError> {
        match value {
            Value::Array(pair) => match pair.as_slice() {
                [Value::String(name), body] => Self::body_from_json(name, body, prefix),
                _ => Err(WireError::json("operation", "expected [name, body]")),
            },
            Value::Object(object) => {
                let name = object
                    .get("type")
                    .and_then(Value::as_str)
                    .ok_or_else(|| WireError::json("operation", "missing type"))?;
                let name = name.strip_suffix("_operation").unwrap_or(name);
                let body = object.get("value").unwrap_or(&Value::Null);
                Self::body_from_json(name, body, prefix)
            }
            other => Err(WireError::json("operation", format!("unexpected {other}"))),
        }
    }
}
