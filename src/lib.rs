// Copyright 2023 - See NOTICE file for copyright holders.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//	http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![no_std]
extern crate alloc;

pub mod ethsig;
pub mod sol;

use ethsig::{recover_signer, voucher_signing_digest, EthAddress, EthHash};
use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, log, symbol_short, token, Address,
    BytesN, Env, Symbol,
};

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Error {
    InvalidSignature = 1,
    AmountMismatch = 2,
    AmountExceedsDeposit = 3,
    AlreadyClosed = 4,
    TimeoutNotElapsed = 5,
    Unauthorized = 6,
    ChannelAlreadyExists = 7,
    ChannelNotFound = 8,
    InvalidAmount = 9,
    InvalidParticipants = 10,
}

/// A channel party: the account holding its funds and the secp256k1
/// identity that signs its vouchers.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Participant {
    pub addr: Address,
    pub signer: BytesN<20>,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Params {
    pub funder: Participant,
    pub counterparty: Participant,
    pub token: Address,
    pub deposit: i128,
    pub timeout: u64,
}

#[contracttype]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Role {
    Funder,
    Counterparty,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Voucher {
    pub amount: i128,
    pub role: Role,
}

/// The voucher awaiting its counter-voucher, if any.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RecordedVoucher {
    None,
    Some(Voucher),
}

impl RecordedVoucher {
    pub fn get(&self) -> Option<&Voucher> {
        match self {
            RecordedVoucher::None => None,
            RecordedVoucher::Some(voucher) => Some(voucher),
        }
    }
}

#[contracttype]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Status {
    Open,
    Settled,
    Reclaimed,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Control {
    pub created_at: u64,
    pub voucher: RecordedVoucher,
    pub status: Status,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Channel {
    pub params: Params,
    pub control: Control,
}

#[contract]
pub struct StateChannel;

const CHANNEL: Symbol = symbol_short!("CHANNEL");

pub(crate) const DAY_IN_LEDGERS: u32 = 17280;
pub(crate) const INSTANCE_BUMP_AMOUNT: u32 = 30 * DAY_IN_LEDGERS;
pub(crate) const INSTANCE_LIFETIME_THRESHOLD: u32 = INSTANCE_BUMP_AMOUNT - DAY_IN_LEDGERS;

#[contractimpl]
impl StateChannel {
    /// Opens the channel and escrows `deposit` of `token` from the funder.
    pub fn open(
        env: Env,
        funder: Participant,
        counterparty: Participant,
        token: Address,
        deposit: i128,
        timeout: u64,
    ) -> Result<(), Error> {
        // checks
        if env.storage().instance().has(&CHANNEL) {
            return Err(Error::ChannelAlreadyExists);
        }
        if deposit < 0 {
            return Err(Error::InvalidAmount);
        }
        // Roles are told apart by the recovered signer only.
        if funder.signer == counterparty.signer {
            return Err(Error::InvalidParticipants);
        }
        funder.addr.require_auth();

        // effects
        let channel = Channel {
            params: Params {
                funder,
                counterparty,
                token,
                deposit,
                timeout,
            },
            control: Control {
                created_at: env.ledger().timestamp(),
                voucher: RecordedVoucher::None,
                status: Status::Open,
            },
        };
        set_channel(&env, &channel);
        log!(&env, "channel opened", deposit, timeout);
        env.events()
            .publish((CHANNEL, symbol_short!("open")), channel.clone());

        // interact
        let contract = env.current_contract_address();
        transfer(&env, &channel.params.token, &channel.params.funder.addr, &contract, deposit);
        Ok(())
    }

    /// Recovers the identity that signed `digest`. Independent of channel state.
    pub fn recover_signer(
        env: Env,
        digest: BytesN<32>,
        recovery_id: u32,
        r: BytesN<32>,
        s: BytesN<32>,
    ) -> Result<BytesN<20>, Error> {
        let signer = recover(&digest, recovery_id, &r, &s)?;
        Ok(sol::convert_address(&env, &signer))
    }

    /// Submits one party's voucher for `amount`. The second voucher for the
    /// same amount, signed by the other party, settles the channel.
    ///
    /// Anyone may submit; the signature is the authorization. `digest` must be
    /// the signing digest of `amount` on this channel.
    pub fn close_channel(
        env: Env,
        digest: BytesN<32>,
        recovery_id: u32,
        r: BytesN<32>,
        s: BytesN<32>,
        amount: i128,
    ) -> Result<(), Error> {
        // checks
        let mut channel = get_channel(&env)?;
        if channel.control.status != Status::Open {
            return Err(Error::AlreadyClosed);
        }
        let voucher_amount = sol::convert_amount(amount)?;
        if amount > channel.params.deposit {
            return Err(Error::AmountExceedsDeposit);
        }
        let expected = voucher_signing_digest(&channel_identity(&env), voucher_amount);
        if digest.to_array() != expected.0 {
            return Err(Error::InvalidSignature);
        }
        let signer = recover(&digest, recovery_id, &r, &s)?;
        let role = signer_role(&env, &channel.params, &signer)?;

        let counter_voucher = match channel.control.voucher.get() {
            None => false,
            Some(recorded) if recorded.amount != amount => return Err(Error::AmountMismatch),
            Some(recorded) => recorded.role != role,
        };

        if !counter_voucher {
            // A repeated voucher from the same party leaves the record as is.
            if channel.control.voucher.get().is_none() {
                let voucher = Voucher { amount, role };
                channel.control.voucher = RecordedVoucher::Some(voucher.clone());
                set_channel(&env, &channel);
                log!(&env, "voucher recorded", amount, role);
                env.events()
                    .publish((CHANNEL, symbol_short!("voucher")), voucher);
            }
            return Ok(());
        }

        // effects
        channel.control.status = Status::Settled;
        set_channel(&env, &channel);
        let refund = channel.params.deposit - amount;
        log!(&env, "channel settled", amount, refund);
        env.events()
            .publish((CHANNEL, symbol_short!("settled")), (amount, refund));

        // interact
        let contract = env.current_contract_address();
        transfer(&env, &channel.params.token, &contract, &channel.params.counterparty.addr, amount);
        transfer(&env, &channel.params.token, &contract, &channel.params.funder.addr, refund);
        Ok(())
    }

    /// Returns the full deposit to the funder once the timeout has elapsed.
    pub fn channel_timeout(env: Env, caller: Address) -> Result<(), Error> {
        // checks
        let mut channel = get_channel(&env)?;
        if channel.control.status != Status::Open {
            return Err(Error::AlreadyClosed);
        }
        if caller != channel.params.funder.addr {
            return Err(Error::Unauthorized);
        }
        caller.require_auth();
        if !is_timeout_elapsed(&env, &channel) {
            return Err(Error::TimeoutNotElapsed);
        }

        // effects
        channel.control.status = Status::Reclaimed;
        set_channel(&env, &channel);
        let deposit = channel.params.deposit;
        log!(&env, "channel reclaimed", deposit);
        env.events()
            .publish((CHANNEL, symbol_short!("reclaimed")), deposit);

        // interact
        let contract = env.current_contract_address();
        transfer(&env, &channel.params.token, &contract, &channel.params.funder.addr, deposit);
        Ok(())
    }

    pub fn get_channel(env: Env) -> Result<Channel, Error> {
        get_channel(&env)
    }

    pub fn is_active(env: Env) -> bool {
        match get_channel(&env) {
            Ok(channel) => channel.control.status == Status::Open,
            Err(_) => false,
        }
    }

    /// The 20-byte identity every voucher on this channel is bound to.
    pub fn channel_identity(env: Env) -> BytesN<20> {
        sol::convert_address(&env, &channel_identity(&env))
    }

    /// The digest a party signs to authorize `amount` on this channel.
    pub fn voucher_digest(env: Env, amount: i128) -> Result<BytesN<32>, Error> {
        let amount = sol::convert_amount(amount)?;
        let digest = voucher_signing_digest(&channel_identity(&env), amount);
        Ok(BytesN::from_array(&env, &digest.0))
    }
}

// get_channel returns the channel stored in this instance or an error if it has not been opened.
pub fn get_channel(env: &Env) -> Result<Channel, Error> {
    env.storage()
        .instance()
        .get(&CHANNEL)
        .ok_or(Error::ChannelNotFound)
}

// set_channel stores the channel and keeps the instance alive.
pub fn set_channel(env: &Env, channel: &Channel) {
    env.storage().instance().set(&CHANNEL, channel);
    env.storage()
        .instance()
        .extend_ttl(INSTANCE_LIFETIME_THRESHOLD, INSTANCE_BUMP_AMOUNT);
}

// channel_identity derives the 20-byte channel identity from the contract
// address, the way an Ethereum address is derived from a public key.
pub fn channel_identity(env: &Env) -> EthAddress {
    sol::convert_contract_address(env, &env.current_contract_address())
}

pub fn signer_role(env: &Env, params: &Params, signer: &EthAddress) -> Result<Role, Error> {
    let signer = sol::convert_address(env, signer);
    if signer == params.funder.signer {
        Ok(Role::Funder)
    } else if signer == params.counterparty.signer {
        Ok(Role::Counterparty)
    } else {
        Err(Error::InvalidSignature)
    }
}

pub fn is_timeout_elapsed(env: &Env, channel: &Channel) -> bool {
    let current_time = env.ledger().timestamp();
    current_time.saturating_sub(channel.control.created_at) >= channel.params.timeout
}

fn recover(
    digest: &BytesN<32>,
    recovery_id: u32,
    r: &BytesN<32>,
    s: &BytesN<32>,
) -> Result<EthAddress, Error> {
    let v = u8::try_from(recovery_id).map_err(|_| Error::InvalidSignature)?;
    recover_signer(&EthHash(digest.to_array()), v, &r.to_array(), &s.to_array())
}

fn transfer(env: &Env, token: &Address, from: &Address, to: &Address, amount: i128) {
    if amount == 0 {
        return;
    }
    let token_client = token::Client::new(env, token);
    token_client.transfer(from, to, &amount);
}
