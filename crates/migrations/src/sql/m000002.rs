use indoc::indoc;

use super::CassaMigration;

/// The print job queue.
pub const M000002_MIGRATION: CassaMigration = CassaMigration {
    name: "m000002",
    is_breaking: false,
    stmts: &[
        indoc! {r#"
            create table :CASSA_SCHEMA.jobs (
                id bigserial primary key,
                order_id bigint not null references :CASSA_SCHEMA.orders on delete restrict,
                queue_name text not null,
                payload text not null,
                state text not null default 'pending'
                    check (state in ('pending', 'processing', 'sent', 'error')),
                attempts int not null default 0 check (attempts >= 0),
                last_error text,
                locked_at timestamptz,
                created_at timestamptz not null default clock_timestamp(),
                sent_at timestamptz,
                constraint jobs_sent_without_error check (state <> 'sent' or last_error is null)
            );
        "#},
        indoc! {r#"
            create index jobs_claimable_idx
                on :CASSA_SCHEMA.jobs (created_at, id)
                where state = 'pending';
        "#},
        indoc! {r#"
            create index jobs_order_id_state_idx on :CASSA_SCHEMA.jobs (order_id, state);
        "#},
        indoc! {r#"
            create function :CASSA_SCHEMA.tg_jobs__queue_name_immutable() returns trigger as $$
            begin
                if new.queue_name is distinct from old.queue_name then
                    raise exception 'Job queue name cannot be changed once stored.' using errcode = 'CPQNI';
                end if;
                return new;
            end;
            $$ language plpgsql;
        "#},
        indoc! {r#"
            create trigger _100_queue_name_immutable
                before update on :CASSA_SCHEMA.jobs
                for each row
                execute procedure :CASSA_SCHEMA.tg_jobs__queue_name_immutable();
        "#},
    ],
};
