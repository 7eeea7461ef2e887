// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Contract bindings for the settlement token and the fiat bridge.

use alloy::sol;

// ERC-20 surface used by the conversion flow.
sol! {
    #[sol(rpc)]
    interface IERC20 {
        function decimals() external view returns (uint8);
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }
}

// Bridge contract that escrows tokens for an off-chain payout. `fiatAmount`
// is in currency minor units and `transactionId` carries the conversion id.
sol! {
    #[sol(rpc)]
    interface IFiatBridge {
        function initiateOfframp(
            address token,
            uint256 tokenAmount,
            uint256 fiatAmount,
            string fiatCurrency,
            string transactionId
        ) external returns (bytes32);
    }
}
