use crate::domain::wallet::Wallet;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct WalletRow<'a> {
    tenant: &'a str,
    balance: String,
    free_quota_remaining: u32,
    paused: bool,
}

/// Writes wallet snapshots as `tenant,balance,free_quota_remaining,paused`.
pub struct WalletWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> WalletWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_wallets<'a>(&mut self, wallets: impl IntoIterator<Item = &'a Wallet>) -> Result<()> {
        let mut wrote_any = false;
        for wallet in wallets {
            self.writer.serialize(WalletRow {
                tenant: wallet.tenant.as_str(),
                balance: wallet.balance.to_string(),
                free_quota_remaining: wallet.free_quota_remaining,
                paused: wallet.is_paused,
            })?;
            wrote_any = true;
        }
        if !wrote_any {
            self.writer
                .write_record(["tenant", "balance", "free_quota_remaining", "paused"])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Balance;
    use crate::domain::tenant::TenantId;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_writes_header_and_normalized_balance() {
        let mut wallet = Wallet::new(TenantId::new("acme"), 0, Utc::now());
        wallet.balance = Balance::new(dec!(8.00));
        wallet.is_paused = true;

        let mut out = Vec::new();
        WalletWriter::new(&mut out).write_wallets([&wallet]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "tenant,balance,free_quota_remaining,paused\nacme,8,0,true\n");
    }

    #[test]
    fn test_empty_still_has_header() {
        let mut out = Vec::new();
        WalletWriter::new(&mut out).write_wallets(&Vec::<Wallet>::new()).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "tenant,balance,free_quota_remaining,paused\n"
        );
    }
}
