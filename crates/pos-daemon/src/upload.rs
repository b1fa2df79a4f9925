//! CSV upload parsing.
//!
//! Format (headers case-insensitive; column order can vary):
//! `productId,quantity,price,currency[,accountId][,positionType][,marketValue][,ticker]`
//!
//! A file may carry one account (no `accountId` column; the caller names
//! the account) or many (per-row `accountId`, bounded by the
//! accounts-per-batch guard). Decimal columns stay strings; normalization
//! happens in the validation pipeline like every other source.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};

use pos_schemas::RawPosition;

pub struct UploadGuards {
    pub max_positions: usize,
    pub max_bytes: usize,
    pub max_accounts: usize,
}

/// Parse an upload file into per-account position lists.
///
/// `default_account` is used for rows without an `accountId` column; a file
/// with neither is rejected.
pub fn parse_csv_positions(
    body: &str,
    default_account: Option<&str>,
    guards: &UploadGuards,
) -> Result<BTreeMap<String, Vec<RawPosition>>> {
    if body.len() > guards.max_bytes {
        bail!(
            "upload of {} bytes exceeds the {} byte limit",
            body.len(),
            guards.max_bytes
        );
    }

    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let headers = rdr.headers().context("csv must have a header row")?.clone();
    let col = |name: &str| -> Option<usize> {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
    };

    let product_idx = col("productId").context("csv is missing the productId column")?;
    let quantity_idx = col("quantity").context("csv is missing the quantity column")?;
    let price_idx = col("price").context("csv is missing the price column")?;
    let currency_idx = col("currency").context("csv is missing the currency column")?;
    let account_idx = col("accountId");
    let ptype_idx = col("positionType");
    let mv_idx = col("marketValue");
    let ticker_idx = col("ticker");

    if account_idx.is_none() && default_account.is_none() {
        bail!("csv has no accountId column and no account was named in the request");
    }

    let mut by_account: BTreeMap<String, Vec<RawPosition>> = BTreeMap::new();
    let mut total = 0usize;

    for rec in rdr.records() {
        let rec = rec.context("csv read record failed")?;
        total += 1;
        if total > guards.max_positions {
            bail!("upload exceeds the {}-position limit", guards.max_positions);
        }

        let field = |idx: usize| rec.get(idx).unwrap_or("").to_string();
        let opt_field = |idx: Option<usize>| {
            idx.and_then(|i| rec.get(i))
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let account = opt_field(account_idx)
            .or_else(|| default_account.map(str::to_string))
            .context("row has an empty accountId and no default account applies")?;

        let position = RawPosition {
            product_id: field(product_idx),
            position_type: opt_field(ptype_idx).unwrap_or_else(|| "SETTLED".to_string()),
            quantity: field(quantity_idx),
            price: Some(field(price_idx)).filter(|s| !s.is_empty()),
            currency: field(currency_idx),
            market_value: opt_field(mv_idx),
            ticker: opt_field(ticker_idx),
            asset_class: None,
            issue_currency: None,
            settlement_currency: None,
        };

        let slot = by_account.entry(account).or_default();
        slot.push(position);

        if by_account.len() > guards.max_accounts {
            bail!(
                "upload touches more than {} accounts in one batch",
                guards.max_accounts
            );
        }
    }

    if by_account.is_empty() {
        bail!("csv contained no position rows");
    }
    Ok(by_account)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guards() -> UploadGuards {
        UploadGuards {
            max_positions: 100,
            max_bytes: 1 << 20,
            max_accounts: 10,
        }
    }

    #[test]
    fn parses_single_account_file() {
        let csv = "productId,quantity,price,currency\nPROD1,100,150.25,USD\nPROD2,-5,10,EUR\n";
        let book = parse_csv_positions(csv, Some("1001"), &guards()).unwrap();
        assert_eq!(book.len(), 1);
        let rows = &book["1001"];
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].product_id, "PROD1");
        assert_eq!(rows[0].position_type, "SETTLED");
        assert_eq!(rows[1].currency, "EUR");
    }

    #[test]
    fn groups_rows_by_account_column() {
        let csv = "accountId,productId,quantity,price,currency\n\
                   1001,P1,10,1.5,USD\n\
                   1002,P2,20,2.5,USD\n\
                   1001,P3,30,3.5,USD\n";
        let book = parse_csv_positions(csv, None, &guards()).unwrap();
        assert_eq!(book.len(), 2);
        assert_eq!(book["1001"].len(), 2);
        assert_eq!(book["1002"].len(), 1);
    }

    #[test]
    fn header_order_and_case_are_flexible() {
        let csv = "CURRENCY,PRICE,QUANTITY,PRODUCTID,positiontype\nUSD,1.5,10,P1,TRADED\n";
        let book = parse_csv_positions(csv, Some("1001"), &guards()).unwrap();
        assert_eq!(book["1001"][0].product_id, "P1");
        assert_eq!(book["1001"][0].position_type, "TRADED");
    }

    #[test]
    fn missing_required_column_fails() {
        let csv = "productId,quantity,currency\nP1,10,USD\n";
        assert!(parse_csv_positions(csv, Some("1001"), &guards()).is_err());
    }

    #[test]
    fn no_account_anywhere_fails() {
        let csv = "productId,quantity,price,currency\nP1,10,1,USD\n";
        assert!(parse_csv_positions(csv, None, &guards()).is_err());
    }

    #[test]
    fn limits_enforced() {
        let mut csv = String::from("productId,quantity,price,currency\n");
        for i in 0..5 {
            csv.push_str(&format!("P{i},1,1,USD\n"));
        }
        let tight = UploadGuards {
            max_positions: 3,
            max_bytes: 1 << 20,
            max_accounts: 10,
        };
        assert!(parse_csv_positions(&csv, Some("1001"), &tight).is_err());

        let mut csv = String::from("accountId,productId,quantity,price,currency\n");
        for i in 0..5 {
            csv.push_str(&format!("A{i},P1,1,1,USD\n"));
        }
        let narrow = UploadGuards {
            max_positions: 100,
            max_bytes: 1 << 20,
            max_accounts: 2,
        };
        assert!(parse_csv_positions(&csv, None, &narrow).is_err());
    }
}
