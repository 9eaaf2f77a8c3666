//! ABI bindings for the lending protocol contracts.

use alloy::sol;

sol! {
    /// Receipt-token market (one per underlying asset).
    interface ILToken {
        function supply(uint256 supplyAmount) external returns (uint256);
        function redeem(uint256 redeemTokens) external returns (uint256);
        function borrow(uint256 borrowAmount) external returns (uint256);
        function repayBorrow(uint256 repayAmount) external returns (uint256);

        function exchangeRateStored() external view returns (uint256);
        function getSupplyRate() external view returns (uint256);
        function getBorrowRate() external view returns (uint256);
        function getCash() external view returns (uint256);
        function totalSupply() external view returns (uint256);
        function totalBorrows() external view returns (uint256);
        function accountTokens(address account) external view returns (uint256);
        function borrowBalanceStored(address account) external view returns (uint256);
    }

    interface IComptroller {
        function accountMembership(address account, address lToken) external view returns (bool);
        function getAccountLiquidity(address account) external view returns (uint256 liquidity, uint256 shortfall);
        function enterMarkets(address[] calldata lTokens) external;
        function exitMarket(address lTokenAddress) external returns (uint256);
        function markets(address lToken) external view returns (bool);
        function borrowAllowed(address lToken, address borrower, uint256 borrowAmount) external view returns (uint256);
        function oracle() external view returns (address);
    }

    interface IPriceOracle {
        function getUnderlyingPrice(address lToken) external view returns (uint256);
        function getPriceWithMetadata(address lToken) external view returns (uint256 price, uint256 updatedAt, bool isStale);
        function checkPriceFeedHealth(address lToken) external view returns (bool healthy, string memory reason);
        function useEmergencyPrice(address lToken) external view returns (bool);
        function emergencyPrices(address lToken) external view returns (uint256);

        function pausePriceFeed(address lToken, uint256 emergencyPrice) external;
        function resumePriceFeed(address lToken) external;
    }

    interface IERC20 {
        function allowance(address owner, address spender) external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }
}
