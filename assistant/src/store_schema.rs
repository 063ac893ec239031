//! Finance database schema and demo data.
//!
//! Every tenant-owned table carries the `tenant_key` column that the query
//! gateway filters on. The demo rows cover two tenants so isolation can be
//! checked by hand.

/// Bump when the DDL changes; stored in `PRAGMA user_version`.
pub const FINANCE_SCHEMA_VERSION: i32 = 1;

/// Tables created by [`FINANCE_SCHEMA`], in dependency order.
pub const FINANCE_TABLES: &[&str] = &[
    "users",
    "accounts",
    "categories",
    "transactions",
    "assets",
    "goals",
    "debts",
    "payments",
];

pub const FINANCE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    tenant_key INTEGER NOT NULL,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    phone TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY,
    tenant_key INTEGER NOT NULL,
    name TEXT NOT NULL,
    type TEXT NOT NULL CHECK (type IN ('cash', 'bank', 'credit', 'other')),
    currency TEXT NOT NULL,
    balance REAL NOT NULL DEFAULT 0,
    description TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY,
    tenant_key INTEGER NOT NULL,
    name TEXT NOT NULL,
    type TEXT NOT NULL CHECK (type IN ('income', 'expense')),
    description TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY,
    tenant_key INTEGER NOT NULL,
    account_id INTEGER NOT NULL REFERENCES accounts(id),
    category_id INTEGER REFERENCES categories(id),
    amount REAL NOT NULL,
    description TEXT,
    transaction_date TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS assets (
    id INTEGER PRIMARY KEY,
    tenant_key INTEGER NOT NULL,
    name TEXT NOT NULL,
    asset_type TEXT NOT NULL,
    value REAL NOT NULL,
    acquired_on TEXT
);

CREATE TABLE IF NOT EXISTS goals (
    id INTEGER PRIMARY KEY,
    tenant_key INTEGER NOT NULL,
    name TEXT NOT NULL,
    target_amount REAL NOT NULL,
    current_amount REAL NOT NULL DEFAULT 0,
    deadline TEXT
);

CREATE TABLE IF NOT EXISTS debts (
    id INTEGER PRIMARY KEY,
    tenant_key INTEGER NOT NULL,
    creditor TEXT NOT NULL,
    principal REAL NOT NULL,
    interest_rate REAL,
    due_date TEXT
);

CREATE TABLE IF NOT EXISTS payments (
    id INTEGER PRIMARY KEY,
    tenant_key INTEGER NOT NULL,
    debt_id INTEGER NOT NULL REFERENCES debts(id),
    amount REAL NOT NULL,
    paid_on TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_accounts_tenant ON accounts(tenant_key);
CREATE INDEX IF NOT EXISTS idx_categories_tenant ON categories(tenant_key);
CREATE INDEX IF NOT EXISTS idx_transactions_tenant ON transactions(tenant_key);
"#;

/// Demo rows as `(table, csv)` pairs; the CSV header names the columns.
/// Empty fields load as NULL.
pub const DEMO_DATA: &[(&str, &str)] = &[
    (
        "users",
        "id,tenant_key,name,email,phone
1,1,Ana Torres,ana@example.com,+57 300 000 0001
2,2,Luis Gomez,luis@example.com,
",
    ),
    (
        "accounts",
        "id,tenant_key,name,type,currency,balance,description,is_active
1,1,Wallet,cash,COP,250000,Everyday cash,1
2,1,Savings,bank,USD,1800.50,Main savings account,1
3,1,Visa,credit,USD,-320.75,,1
4,2,Checking,bank,EUR,940,,1
5,2,Old card,credit,EUR,0,Closed in 2023,0
",
    ),
    (
        "categories",
        "id,tenant_key,name,type,description
1,1,Salary,income,Monthly salary
2,1,Groceries,expense,
3,1,Transport,expense,Bus and taxi
4,2,Freelance,income,
5,2,Rent,expense,
",
    ),
    (
        "transactions",
        "id,tenant_key,account_id,category_id,amount,description,transaction_date
1,1,2,1,3000,October salary,2024-10-01
2,1,1,2,-85.20,Supermarket,2024-10-03
3,1,3,3,-12.50,Taxi,2024-10-04
4,1,1,2,-40.10,Market,2024-10-10
5,2,4,4,1200,Website project,2024-10-02
6,2,4,5,-700,October rent,2024-10-05
",
    ),
    (
        "assets",
        "id,tenant_key,name,asset_type,value,acquired_on
1,1,Laptop,equipment,1500,2023-05-20
2,2,Car,vehicle,9000,2021-02-11
",
    ),
    (
        "goals",
        "id,tenant_key,name,target_amount,current_amount,deadline
1,1,Emergency fund,5000,1800.50,2025-06-30
2,2,Holiday,2000,350,2025-12-01
",
    ),
    (
        "debts",
        "id,tenant_key,creditor,principal,interest_rate,due_date
1,1,Visa,320.75,0.28,2024-11-15
2,2,Car loan,4500,0.09,2027-02-11
",
    ),
    (
        "payments",
        "id,tenant_key,debt_id,amount,paid_on
1,1,1,100,2024-09-15
2,2,2,250,2024-10-11
",
    ),
];
