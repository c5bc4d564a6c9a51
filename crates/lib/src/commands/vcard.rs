//! vCard export and number extraction.

use crate::client::Participant;
use crate::jid;
use regex::Regex;
use std::sync::OnceLock;

pub const VCF_MIMETYPE: &str = "text/vcard";
pub const VCF_FILE_NAME: &str = "group_contacts.vcf";

fn waid_pattern() -> &'static Regex {
    static WAID: OnceLock<Regex> = OnceLock::new();
    WAID.get_or_init(|| Regex::new(r"waid=(\d+)").expect("waid pattern is valid"))
}

/// One vCard 3.0 record per participant, named "Member 1".."Member N" in participant order.
/// The number goes in both the `waid` parameter and the phone value.
pub fn build_vcf(participants: &[Participant]) -> String {
    let mut out = String::new();
    for (i, p) in participants.iter().enumerate() {
        let num = jid::user_part(&p.id);
        out.push_str(&format!(
            "BEGIN:VCARD\nVERSION:3.0\nFN:Member {}\nTEL;type=CELL;type=VOICE;waid={}:{}\nEND:VCARD\n",
            i + 1,
            num,
            num
        ));
    }
    out
}

/// Every `waid=<digits>` occurrence, in document order (duplicates kept).
pub fn extract_waids(text: &str) -> Vec<String> {
    waid_pattern()
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}
