use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    PriceInquiry,
    Order,
    Complaint,
    HumanHandoff,
    DeliveryStatus,
    ProductInfo,
    Greeting,
    Thanks,
    Unknown,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::PriceInquiry => "price_inquiry",
            Intent::Order => "order",
            Intent::Complaint => "complaint",
            Intent::HumanHandoff => "human_handoff",
            Intent::DeliveryStatus => "delivery_status",
            Intent::ProductInfo => "product_info",
            Intent::Greeting => "greeting",
            Intent::Thanks => "thanks",
            Intent::Unknown => "unknown",
        }
    }

    /// The conversation goes to a human operator.
    pub fn requires_handoff(self) -> bool {
        matches!(self, Intent::Complaint | Intent::HumanHandoff)
    }

    pub fn creates_lead(self) -> bool {
        matches!(
            self,
            Intent::Order | Intent::Complaint | Intent::HumanHandoff | Intent::PriceInquiry
        )
    }

    fn reply(self) -> &'static str {
        match self {
            Intent::PriceInquiry => {
                "Narxlar bo'yicha ma'lumot yuboramiz. Qaysi mahsulot sizni qiziqtiryapti?"
            }
            Intent::Order => {
                "Buyurtmangiz uchun rahmat! Ismingiz va telefon raqamingizni qoldiring, tez orada bog'lanamiz."
            }
            Intent::Complaint => {
                "Noqulaylik uchun uzr so'raymiz. Murojaatingizni operatorga uzatdik, tez orada javob beramiz."
            }
            Intent::HumanHandoff => {
                "Albatta! Sizni operator bilan bog'layapmiz, iltimos biroz kuting."
            }
            Intent::DeliveryStatus => {
                "Buyurtma raqamingizni yuboring, yetkazib berish holatini tekshirib beramiz."
            }
            Intent::ProductInfo => {
                "Mahsulot haqida batafsil ma'lumot beramiz. Qaysi mahsulot haqida so'rayapsiz?"
            }
            Intent::Greeting => "Assalomu alaykum! Sizga qanday yordam bera olamiz?",
            Intent::Thanks => "Sizga ham rahmat! Yana savollar bo'lsa, yozing.",
            Intent::Unknown => {
                "Xabaringiz uchun rahmat! Savolingizni aniqroq yozing yoki \"operator\" deb yozing."
            }
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checked in order; the first category with a matching keyword wins.
const KEYWORDS: &[(Intent, &[&str])] = &[
    (
        Intent::HumanHandoff,
        &[
            "operator", "оператор", "menejer", "manager", "менеджер", "jonli", "живой",
            "odam bilan", "человек", "bog'lan", "support",
        ],
    ),
    (
        Intent::Complaint,
        &[
            "muammo", "shikoyat", "buzilgan", "yomon", "qaytaring", "pulimni", "жалоб",
            "проблем", "сломан", "ishlamayapti", "complaint", "broken", "refund",
        ],
    ),
    (
        Intent::DeliveryStatus,
        &[
            "yetkazib", "dostavka", "доставк", "qachon keladi", "kuryer", "delivery",
            "buyurtmam qayerda",
        ],
    ),
    (
        Intent::Order,
        &["buyurtma", "sotib ol", "olmoqchiman", "заказ", "купить", "order", "xarid"],
    ),
    (
        Intent::PriceInquiry,
        &["narx", "narhi", "necha pul", "qancha", "цен", "стоит", "price"],
    ),
    (
        Intent::ProductInfo,
        &[
            "ma'lumot", "haqida", "tarkibi", "razmer", "o'lcham", "информац",
            "характеристик", "info", "katalog",
        ],
    ),
    (
        Intent::Greeting,
        &["salom", "assalomu", "привет", "здравств", "hello", "hayrli kun"],
    ),
    (
        Intent::Thanks,
        &["rahmat", "raxmat", "спасибо", "thank", "tashakkur"],
    ),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntentResult {
    pub intent: Intent,
    pub matched_keyword: Option<&'static str>,
    pub requires_handoff: bool,
    pub creates_lead: bool,
    pub should_fallback: bool,
    pub reply: &'static str,
}

impl IntentResult {
    fn new(intent: Intent, matched_keyword: Option<&'static str>) -> Self {
        Self {
            intent,
            matched_keyword,
            requires_handoff: intent.requires_handoff(),
            creates_lead: intent.creates_lead(),
            should_fallback: intent == Intent::Unknown,
            reply: intent.reply(),
        }
    }
}

/// Keyword-based classifier for inbound Uzbek/Russian/English DMs.
pub struct IntentMatcher;

impl IntentMatcher {
    pub fn classify(text: &str) -> IntentResult {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return IntentResult::new(Intent::Unknown, None);
        }
        for (intent, keywords) in KEYWORDS {
            if let Some(keyword) = keywords.iter().find(|k| normalized.contains(*k)) {
                return IntentResult::new(*intent, Some(*keyword));
            }
        }
        IntentResult::new(Intent::Unknown, None)
    }
}

/// Lowercases and folds the apostrophe variants used in Uzbek Latin
/// (`ʻ`, `ʼ`, `’`, `` ` ``) to `'`.
fn normalize(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            '\u{2019}' | '\u{02BB}' | '\u{02BC}' | '`' => '\'',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complaints_hand_off_to_an_operator() {
        for text in [
            "Menda muammo bor",
            "Mahsulot buzilgan",
            "Shikoyat qilmoqchiman",
            "Bu juda yomon xizmat",
            "Pulimni qaytaring",
        ] {
            let result = IntentMatcher::classify(text);
            assert_eq!(result.intent, Intent::Complaint, "{text}");
            assert!(result.requires_handoff, "{text}");
            assert!(result.creates_lead, "{text}");
            assert!(result.reply.contains("operator"), "{text}");
        }
    }

    #[test]
    fn explicit_operator_request() {
        let result = IntentMatcher::classify("Operator bilan gaplashmoqchiman");
        assert_eq!(result.intent, Intent::HumanHandoff);
        assert_eq!(result.matched_keyword, Some("operator"));
        assert!(result.requires_handoff);
        assert!(result.reply.contains("operator"));
    }

    #[test]
    fn price_questions_create_leads_without_handoff() {
        for text in ["Bu ko'ylakning narxi qancha?", "Necha pul?", "Сколько стоит?"] {
            let result = IntentMatcher::classify(text);
            assert_eq!(result.intent, Intent::PriceInquiry, "{text}");
            assert!(!result.requires_handoff);
            assert!(result.creates_lead);
        }
    }

    #[test]
    fn earlier_categories_win() {
        // "buyurtma" is an order keyword but the complaint matches first.
        let result = IntentMatcher::classify("Buyurtma buzilgan keldi");
        assert_eq!(result.intent, Intent::Complaint);
        let result = IntentMatcher::classify("Buyurtmam qayerda?");
        assert_eq!(result.intent, Intent::DeliveryStatus);
    }

    #[test]
    fn apostrophe_variants_match() {
        assert_eq!(IntentMatcher::classify("Mahsulot haqida maʼlumot").intent, Intent::ProductInfo);
        assert_eq!(IntentMatcher::classify("Operator bilan bog’lanish").intent, Intent::HumanHandoff);
    }

    #[test]
    fn greetings_and_thanks_do_not_create_leads() {
        let greeting = IntentMatcher::classify("Assalomu alaykum");
        assert_eq!(greeting.intent, Intent::Greeting);
        assert!(!greeting.creates_lead);
        assert_eq!(IntentMatcher::classify("Katta rahmat").intent, Intent::Thanks);
    }

    #[test]
    fn empty_or_unmatched_falls_back() {
        for text in ["", "   ", "qwerty 123"] {
            let result = IntentMatcher::classify(text);
            assert_eq!(result.intent, Intent::Unknown);
            assert!(result.should_fallback);
            assert!(!result.creates_lead);
            assert_eq!(result.matched_keyword, None);
        }
    }
}
