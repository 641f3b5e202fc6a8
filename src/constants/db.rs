use std::sync::LazyLock;

pub static DB_URL: LazyLock<String> = LazyLock::new(|| {
    std::env::var("DATABASE_URL").expect("DATABASE_URL not provided in environment variables")
});
