use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MessageOutbox::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MessageOutbox::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(MessageOutbox::AggregateType)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(MessageOutbox::AggregateId).string().not_null())
                    .col(ColumnDef::new(MessageOutbox::EventType).string().not_null())
                    .col(ColumnDef::new(MessageOutbox::Payload).text().not_null())
                    .col(
                        ColumnDef::new(MessageOutbox::Headers)
                            .text()
                            .not_null()
                            .default("{}"),
                    )
                    .col(
                        ColumnDef::new(MessageOutbox::Status)
                            .string_len(16)
                            .not_null()
                            .default("NEW"),
                    )
                    .col(
                        ColumnDef::new(MessageOutbox::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(MessageOutbox::PublishedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(MessageOutbox::ClaimedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        // Claim query: WHERE status = 'NEW' ORDER BY id.
        manager
            .create_index(
                Index::create()
                    .table(MessageOutbox::Table)
                    .col(MessageOutbox::Status)
                    .col(MessageOutbox::Id)
                    .name("idx_message_outbox_status_id")
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MessageOutbox::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum MessageOutbox {
    Table,
    Id,
    AggregateType,
    AggregateId,
    EventType,
    Payload,
    Headers,
    Status,
    CreatedAt,
    PublishedAt,
    ClaimedAt,
}
