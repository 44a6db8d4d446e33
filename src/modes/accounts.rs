//! Demo account data. Stands in for a real account service.

pub struct MockAccount {
    pub name: &'static str,
    pub statement_url: &'static str,
    pub history: &'static [&'static str],
}

const ACCOUNTS: &[MockAccount] = &[
    MockAccount {
        name: "John Doe",
        statement_url: "https://example.com/statements/john-doe-statement.pdf",
        history: &[
            "Client called on Monday about a transfer delay.",
            "Requested a status update on Wednesday.",
            "Now requesting escalation due to inactivity.",
        ],
    },
    MockAccount {
        name: "Jane Smith",
        statement_url: "https://example.com/statements/jane-smith-statement.pdf",
        history: &[
            "Client inquired about tax documents.",
            "Asked for 2023 and 2024 statements.",
        ],
    },
];

pub fn find_account(name: &str) -> Option<&'static MockAccount> {
    ACCOUNTS.iter().find(|a| a.name == name)
}

pub fn account_names() -> Vec<&'static str> {
    ACCOUNTS.iter().map(|a| a.name).collect()
}
