//! Quote email rendering.
//!
//! Pure string construction from a lead, its price breakdown and the two
//! action links. No storage or network access.

use crate::models::{InterestResponse, Lead};
use crate::pricing::{Price, PriceBreakdown};
use crate::response_token::interest_link;

/// Approve/decline links for one lead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionLinks {
    pub approve: String,
    pub decline: String,
}

impl ActionLinks {
    pub fn for_lead(
        public_base_url: &str,
        secret: &str,
        lead: &Lead,
    ) -> Result<Self, url::ParseError> {
        Ok(Self {
            approve: interest_link(
                public_base_url,
                secret,
                lead.category,
                lead.id,
                InterestResponse::Yes,
            )?,
            decline: interest_link(
                public_base_url,
                secret,
                lead.category,
                lead.id,
                InterestResponse::No,
            )?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedQuote {
    pub subject: String,
    pub text: String,
}

pub fn render_quote(lead: &Lead, breakdown: &PriceBreakdown, links: &ActionLinks) -> RenderedQuote {
    let product = lead.category.display_name();
    let subject = format!("Uw offerte voor {}: {}", product, lead.name);

    let mut text = String::new();
    text.push_str(&format!("Beste {},\n\n", lead.first_name()));
    text.push_str(&format!(
        "Bedankt voor uw aanvraag voor {}. Op basis van de door u gekozen configuratie hebben wij de volgende offerte opgesteld.\n\n",
        product
    ));

    match breakdown.price {
        Price::Amount(total) => {
            for line in &breakdown.lines {
                text.push_str(&format!("  {:<32} {:>14}\n", line.label, line.amount.to_string()));
            }
            text.push_str(&format!("\n  {:<32} {:>14}\n", "Totaal (incl. btw)", total.to_string()));
        }
        Price::OnRequest => {
            text.push_str(
                "Voor dit type project maken wij een prijs op maat. Een van onze adviseurs neemt contact met u op om de details door te nemen.\n",
            );
        }
    }

    if let Some(address) = format_address(lead) {
        text.push_str(&format!("\nProjectadres: {}\n", address));
    }

    text.push_str("\nHeeft u interesse? Laat het ons met een klik weten:\n\n");
    text.push_str(&format!("  Ja, ik heb interesse: {}\n", links.approve));
    text.push_str(&format!("  Nee, bedankt: {}\n", links.decline));
    text.push_str(&format!("\nReferentie: {}\n", lead.id));
    text.push_str("\nMet vriendelijke groet,\nHet offerteteam\n");

    RenderedQuote { subject, text }
}

fn format_address(lead: &Lead) -> Option<String> {
    let street = match (&lead.street, &lead.house_number) {
        (Some(street), Some(number)) => Some(format!("{} {}", street, number)),
        (Some(street), None) => Some(street.clone()),
        _ => None,
    };
    let place = match (&lead.postal_code, &lead.city) {
        (Some(pc), Some(city)) => Some(format!("{} {}", pc, city)),
        (None, Some(city)) => Some(city.clone()),
        (Some(pc), None) => Some(pc.clone()),
        (None, None) => None,
    };

    match (street, place) {
        (Some(s), Some(p)) => Some(format!("{}, {}", s, p)),
        (Some(s), None) => Some(s),
        (None, Some(p)) => Some(p),
        (None, None) => None,
    }
}
