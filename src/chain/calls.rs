use alloy::{primitives::Address, sol_types::SolCall};

use super::{ReadCall, ReadResult, ReadValue, WriteCall};
use crate::{
    config::ContractsConfig,
    contracts::{IComptroller, IERC20, ILToken, IPriceOracle},
    ReadFailure,
};

fn decode_returns<C: SolCall>(data: &[u8]) -> Result<C::Return, ReadFailure> {
    if data.is_empty() {
        return Err(ReadFailure::Decode("empty return data".to_string()));
    }
    C::abi_decode_returns(data).map_err(|e| ReadFailure::Decode(e.to_string()))
}

impl ReadCall {
    /// Contract the call is sent to.
    pub fn target(&self, contracts: &ContractsConfig) -> Address {
        match self {
            ReadCall::ReceiptBalance { ltoken, .. }
            | ReadCall::BorrowBalance { ltoken, .. }
            | ReadCall::ExchangeRate { ltoken }
            | ReadCall::SupplyRate { ltoken }
            | ReadCall::BorrowRate { ltoken }
            | ReadCall::Cash { ltoken }
            | ReadCall::TotalSupply { ltoken }
            | ReadCall::TotalBorrows { ltoken } => *ltoken,

            ReadCall::UnderlyingPrice { .. }
            | ReadCall::PriceMetadata { .. }
            | ReadCall::FeedHealth { .. }
            | ReadCall::UsesEmergencyPrice { .. }
            | ReadCall::EmergencyPrice { .. } => contracts.oracle,

            ReadCall::Membership { .. }
            | ReadCall::AccountLiquidity { .. }
            | ReadCall::MarketListed { .. }
            | ReadCall::BorrowAllowed { .. }
            | ReadCall::OracleAddress => contracts.comptroller,

            ReadCall::Allowance { token, .. } | ReadCall::TokenBalance { token, .. } => *token,
        }
    }

    /// ABI-encoded calldata.
    pub fn calldata(&self) -> Vec<u8> {
        match self {
            ReadCall::ReceiptBalance { account, .. } => ILToken::accountTokensCall {
                account: *account,
            }
            .abi_encode(),
            ReadCall::BorrowBalance { account, .. } => ILToken::borrowBalanceStoredCall {
                account: *account,
            }
            .abi_encode(),
            ReadCall::ExchangeRate { .. } => ILToken::exchangeRateStoredCall {}.abi_encode(),
            ReadCall::SupplyRate { .. } => ILToken::getSupplyRateCall {}.abi_encode(),
            ReadCall::BorrowRate { .. } => ILToken::getBorrowRateCall {}.abi_encode(),
            ReadCall::Cash { .. } => ILToken::getCashCall {}.abi_encode(),
            ReadCall::TotalSupply { .. } => ILToken::totalSupplyCall {}.abi_encode(),
            ReadCall::TotalBorrows { .. } => ILToken::totalBorrowsCall {}.abi_encode(),

            ReadCall::UnderlyingPrice { ltoken } => {
                IPriceOracle::getUnderlyingPriceCall { lToken: *ltoken }.abi_encode()
            }
            ReadCall::PriceMetadata { ltoken } => {
                IPriceOracle::getPriceWithMetadataCall { lToken: *ltoken }.abi_encode()
            }
            ReadCall::FeedHealth { ltoken } => {
                IPriceOracle::checkPriceFeedHealthCall { lToken: *ltoken }.abi_encode()
            }
            ReadCall::UsesEmergencyPrice { ltoken } => {
                IPriceOracle::useEmergencyPriceCall { lToken: *ltoken }.abi_encode()
            }
            ReadCall::EmergencyPrice { ltoken } => {
                IPriceOracle::emergencyPricesCall { lToken: *ltoken }.abi_encode()
            }

            ReadCall::Membership { account, ltoken } => IComptroller::accountMembershipCall {
                account: *account,
                lToken: *ltoken,
            }
            .abi_encode(),
            ReadCall::AccountLiquidity { account } => {
                IComptroller::getAccountLiquidityCall { account: *account }.abi_encode()
            }
            ReadCall::MarketListed { ltoken } => {
                IComptroller::marketsCall { lToken: *ltoken }.abi_encode()
            }
            ReadCall::BorrowAllowed {
                ltoken,
                borrower,
                amount,
            } => IComptroller::borrowAllowedCall {
                lToken: *ltoken,
                borrower: *borrower,
                borrowAmount: *amount,
            }
            .abi_encode(),
            ReadCall::OracleAddress => IComptroller::oracleCall {}.abi_encode(),

            ReadCall::Allowance { owner, spender, .. } => IERC20::allowanceCall {
                owner: *owner,
                spender: *spender,
            }
            .abi_encode(),
            ReadCall::TokenBalance { account, .. } => {
                IERC20::balanceOfCall { account: *account }.abi_encode()
            }
        }
    }

    /// Decode the raw return data of this call.
    pub fn decode(&self, data: &[u8]) -> ReadResult {
        let value = match self {
            ReadCall::ReceiptBalance { .. } => {
                ReadValue::Uint(decode_returns::<ILToken::accountTokensCall>(data)?)
            }
            ReadCall::BorrowBalance { .. } => {
                ReadValue::Uint(decode_returns::<ILToken::borrowBalanceStoredCall>(data)?)
            }
            ReadCall::ExchangeRate { .. } => {
                ReadValue::Uint(decode_returns::<ILToken::exchangeRateStoredCall>(data)?)
            }
            ReadCall::SupplyRate { .. } => {
                ReadValue::Uint(decode_returns::<ILToken::getSupplyRateCall>(data)?)
            }
            ReadCall::BorrowRate { .. } => {
                ReadValue::Uint(decode_returns::<ILToken::getBorrowRateCall>(data)?)
            }
            ReadCall::Cash { .. } => ReadValue::Uint(decode_returns::<ILToken::getCashCall>(data)?),
            ReadCall::TotalSupply { .. } => {
                ReadValue::Uint(decode_returns::<ILToken::totalSupplyCall>(data)?)
            }
            ReadCall::TotalBorrows { .. } => {
                ReadValue::Uint(decode_returns::<ILToken::totalBorrowsCall>(data)?)
            }

            ReadCall::UnderlyingPrice { .. } => {
                ReadValue::Uint(decode_returns::<IPriceOracle::getUnderlyingPriceCall>(data)?)
            }
            ReadCall::PriceMetadata { .. } => {
                let ret = decode_returns::<IPriceOracle::getPriceWithMetadataCall>(data)?;
                ReadValue::PriceMetadata {
                    price: ret.price,
                    updated_at: ret.updatedAt,
                    is_stale: ret.isStale,
                }
            }
            ReadCall::FeedHealth { .. } => {
                let ret = decode_returns::<IPriceOracle::checkPriceFeedHealthCall>(data)?;
                ReadValue::FeedHealth {
                    healthy: ret.healthy,
                    reason: ret.reason,
                }
            }
            ReadCall::UsesEmergencyPrice { .. } => {
                ReadValue::Bool(decode_returns::<IPriceOracle::useEmergencyPriceCall>(data)?)
            }
            ReadCall::EmergencyPrice { .. } => {
                ReadValue::Uint(decode_returns::<IPriceOracle::emergencyPricesCall>(data)?)
            }

            ReadCall::Membership { .. } => {
                ReadValue::Bool(decode_returns::<IComptroller::accountMembershipCall>(data)?)
            }
            ReadCall::AccountLiquidity { .. } => {
                let ret = decode_returns::<IComptroller::getAccountLiquidityCall>(data)?;
                ReadValue::Liquidity {
                    liquidity: ret.liquidity,
                    shortfall: ret.shortfall,
                }
            }
            ReadCall::MarketListed { .. } => {
                ReadValue::Bool(decode_returns::<IComptroller::marketsCall>(data)?)
            }
            ReadCall::BorrowAllowed { .. } => {
                ReadValue::Uint(decode_returns::<IComptroller::borrowAllowedCall>(data)?)
            }
            ReadCall::OracleAddress => {
                ReadValue::Address(decode_returns::<IComptroller::oracleCall>(data)?)
            }

            ReadCall::Allowance { .. } => {
                ReadValue::Uint(decode_returns::<IERC20::allowanceCall>(data)?)
            }
            ReadCall::TokenBalance { .. } => {
                ReadValue::Uint(decode_returns::<IERC20::balanceOfCall>(data)?)
            }
        };
        Ok(value)
    }
}

impl WriteCall {
    pub fn target(&self, contracts: &ContractsConfig) -> Address {
        match self {
            WriteCall::Approve { token, .. } => *token,
            WriteCall::Supply { ltoken, .. }
            | WriteCall::Borrow { ltoken, .. }
            | WriteCall::RepayBorrow { ltoken, .. }
            | WriteCall::Redeem { ltoken, .. } => *ltoken,
            WriteCall::EnterMarkets { .. } | WriteCall::ExitMarket { .. } => contracts.comptroller,
            WriteCall::PausePriceFeed { .. } | WriteCall::ResumePriceFeed { .. } => contracts.oracle,
        }
    }

    pub fn calldata(&self) -> Vec<u8> {
        match self {
            WriteCall::Approve {
                spender, amount, ..
            } => IERC20::approveCall {
                spender: *spender,
                amount: *amount,
            }
            .abi_encode(),
            WriteCall::Supply { amount, .. } => ILToken::supplyCall {
                supplyAmount: *amount,
            }
            .abi_encode(),
            WriteCall::Borrow { amount, .. } => ILToken::borrowCall {
                borrowAmount: *amount,
            }
            .abi_encode(),
            WriteCall::RepayBorrow { amount, .. } => ILToken::repayBorrowCall {
                repayAmount: *amount,
            }
            .abi_encode(),
            WriteCall::Redeem { receipt_amount, .. } => ILToken::redeemCall {
                redeemTokens: *receipt_amount,
            }
            .abi_encode(),
            WriteCall::EnterMarkets { ltokens } => IComptroller::enterMarketsCall {
                lTokens: ltokens.clone(),
            }
            .abi_encode(),
            WriteCall::ExitMarket { ltoken } => IComptroller::exitMarketCall {
                lTokenAddress: *ltoken,
            }
            .abi_encode(),
            WriteCall::PausePriceFeed {
                ltoken,
                emergency_price,
            } => IPriceOracle::pausePriceFeedCall {
                lToken: *ltoken,
                emergencyPrice: *emergency_price,
            }
            .abi_encode(),
            WriteCall::ResumePriceFeed { ltoken } => {
                IPriceOracle::resumePriceFeedCall { lToken: *ltoken }.abi_encode()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, U256};
    use alloy::sol_types::SolValue;

    const LTOKEN: Address = address!("2035a1Ad5542388108aa3ec0EA4cc995422252F6");
    const ACCOUNT: Address = address!("00000000000000000000000000000000000000aa");

    #[test]
    fn test_targets_route_to_the_right_contract() {
        let contracts = ContractsConfig::default();
        assert_eq!(ReadCall::ExchangeRate { ltoken: LTOKEN }.target(&contracts), LTOKEN);
        assert_eq!(
            ReadCall::UnderlyingPrice { ltoken: LTOKEN }.target(&contracts),
            contracts.oracle
        );
        assert_eq!(
            ReadCall::AccountLiquidity { account: ACCOUNT }.target(&contracts),
            contracts.comptroller
        );
        assert_eq!(
            WriteCall::EnterMarkets {
                ltokens: vec![LTOKEN]
            }
            .target(&contracts),
            contracts.comptroller
        );
    }

    #[test]
    fn test_calldata_starts_with_selector() {
        let data = ReadCall::ReceiptBalance {
            ltoken: LTOKEN,
            account: ACCOUNT,
        }
        .calldata();
        assert_eq!(&data[..4], ILToken::accountTokensCall::SELECTOR.as_slice());
        assert_eq!(data.len(), 4 + 32);
    }

    #[test]
    fn test_decode_uint_and_tuple_returns() {
        let encoded = U256::from(42u64).abi_encode();
        let value = ReadCall::Cash { ltoken: LTOKEN }.decode(&encoded).unwrap();
        assert_eq!(value, ReadValue::Uint(U256::from(42u64)));

        let encoded = (U256::from(5u64), U256::ZERO).abi_encode_params();
        let value = ReadCall::AccountLiquidity { account: ACCOUNT }
            .decode(&encoded)
            .unwrap();
        assert_eq!(
            value,
            ReadValue::Liquidity {
                liquidity: U256::from(5u64),
                shortfall: U256::ZERO
            }
        );
    }

    #[test]
    fn test_admin_writes_route_and_encode() {
        let contracts = ContractsConfig::default();
        let pause = WriteCall::PausePriceFeed {
            ltoken: LTOKEN,
            emergency_price: U256::from(2_000u64),
        };
        assert_eq!(pause.target(&contracts), contracts.oracle);
        let data = pause.calldata();
        assert_eq!(&data[..4], IPriceOracle::pausePriceFeedCall::SELECTOR.as_slice());
        assert_eq!(data.len(), 4 + 64);

        let exit = WriteCall::ExitMarket { ltoken: LTOKEN };
        assert_eq!(exit.target(&contracts), contracts.comptroller);
        assert_eq!(&exit.calldata()[..4], IComptroller::exitMarketCall::SELECTOR.as_slice());
    }

    #[test]
    fn test_decode_rejects_empty_data() {
        let err = ReadCall::ExchangeRate { ltoken: LTOKEN }.decode(&[]).unwrap_err();
        assert!(matches!(err, ReadFailure::Decode(_)));
    }
}
