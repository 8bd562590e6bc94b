// Copyright 2025 - See NOTICE file for copyright holders.
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

//! Solidity-compatible encodings of channel data.

use crate::ethsig::EthAddress;
use crate::Error;
use alloc::vec::Vec;
use alloy_primitives::{keccak256, Address, U256};
use alloy_sol_types::SolValue;
use soroban_sdk::{xdr::ToXdr, Address as SorobanAddress, BytesN, Env};

/// Length of `abi.encodePacked(address, uint256)`.
pub const VOUCHER_ENCODING_LEN: usize = 20 + 32;

// encode_voucher packs the channel identity and the amount the same way
// `abi.encodePacked(address channel, uint256 amount)` does: 20 raw address
// bytes followed by the amount as a left-padded 32-byte big-endian word.
pub fn encode_voucher(channel: &EthAddress, amount: u128) -> Vec<u8> {
    let channel_alloy = Address::from_slice(&channel.0);
    let amount_alloy = U256::from(amount);
    (channel_alloy, amount_alloy).abi_encode_packed()
}

// convert_amount turns a token amount into the unsigned voucher amount.
// Token amounts are i128 on Soroban, vouchers only carry non-negative values.
pub fn convert_amount(amount: i128) -> Result<u128, Error> {
    u128::try_from(amount).map_err(|_| Error::InvalidAmount)
}

pub fn convert_address(e: &Env, addr: &EthAddress) -> BytesN<20> {
    BytesN::from_array(e, &addr.0)
}

// convert_contract_address maps a Soroban address onto a 20-byte identity:
// the last 20 bytes of the keccak256 of its XDR encoding.
pub fn convert_contract_address(e: &Env, addr: &SorobanAddress) -> EthAddress {
    let addr_xdr = addr.clone().to_xdr(e);
    let mut addr_bytes = alloc::vec![0u8; addr_xdr.len() as usize];
    addr_xdr.copy_into_slice(&mut addr_bytes);
    let hash = keccak256(&addr_bytes);

    let mut eth_addr = EthAddress([0; 20]);
    eth_addr.0.copy_from_slice(&hash.0[32 - 20..]);
    eth_addr
}
